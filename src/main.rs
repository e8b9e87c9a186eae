use std::io::{self, BufRead, Write};
use std::process;

use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use dht_node::{Configuration, Node};

/// A peer-to-peer distributed hash table node.
#[derive(Parser, Debug)]
#[command(name = "dhtnode", version, about)]
struct Args {
    /// Config file to use.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).is_err() {
        eprintln!("dhtnode: could not initialize the logger");
    }

    let config = match Configuration::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dhtnode: {}", err);
            process::exit(1);
        }
    };

    let node = match Node::new(&config.addr, config.port, &config.boot_addr, config.boot_port) {
        Ok(node) => node,
        Err(err) => {
            eprintln!("dhtnode: {}", err);
            process::exit(1);
        }
    };

    println!("Please type .help for help or .quit to exit the application.");

    let stdin = io::stdin();
    loop {
        let command = match read_line(&stdin, "> ") {
            Some(command) => command,
            None => break,
        };
        if command.is_empty() {
            continue;
        }

        match command.to_lowercase().as_str() {
            ".quit" => break,
            ".put" => {
                let key = match read_line(&stdin, "Enter the key: ") {
                    Some(key) => key,
                    None => break,
                };
                let value = match read_line(&stdin, "Enter the value: ") {
                    Some(value) => value,
                    None => break,
                };
                print!("Adding key-value pair . . . ");
                io::stdout().flush().ok();
                node.put(&key, &value);
                println!("[ OK ]");
            }
            ".lookup" => {
                let key = match read_line(&stdin, "Enter the key: ") {
                    Some(key) => key,
                    None => break,
                };
                match node.get(&key) {
                    Some(value) => println!("Value: {}", value),
                    None => println!("No such key."),
                }
            }
            ".showroutes" => {
                println!();
                println!("Routing Table");
                println!("-------------");
                println!("{}", node.routes());
            }
            ".showuid" => println!("{}", node.uid()),
            ".kvstore" => println!("{}", node.kv_store()),
            ".help" => {
                println!();
                println!(".help\t\tdisplay this message.");
                println!(".quit\t\texit the application.");
                println!(".put\t\tadd a key-value pair to the DHT.");
                println!(".lookup\t\tget value associated with a key in the DHT.");
                println!(".showroutes\tdisplays the routing table.");
                println!(".showuid\tdisplays this nodes UID.");
                println!(".kvstore\tdisplay the contents of the local kv-store.");
            }
            _ => println!("Error: \"{}\" unknown.", command),
        }
    }
}

/// Prompts for and reads one trimmed line. `None` on end of input.
fn read_line(stdin: &io::Stdin, prompt: &str) -> Option<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}
