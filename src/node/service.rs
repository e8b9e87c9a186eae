use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;

use crate::host::Host;
use crate::key::Key;
use crate::node::Node;
use crate::protocol::{self, Message};
use crate::REPLICATION_PARAM;

/// Spawns the service loop serving `node`'s listen address. Binding happens
/// inside the thread: a node that cannot bind keeps its local interface but
/// is unreachable, and the failure is logged.
pub fn start(node: Node) {
    thread::spawn(move || serve(node));
}

fn serve(node: Node) {
    // std's bind enables SO_REUSEADDR on Unix, so a restart can take over
    // a port still in TIME_WAIT
    let listener = match TcpListener::bind((node.host.address.as_str(), node.host.port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!(
                "{} - could not bind service listener on port {}: {}",
                node.host.address, node.host.port, err
            );
            return;
        }
    };

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let node = node.clone();
                thread::spawn(move || handle_connection(&node, stream));
            }
            Err(err) => {
                error!(
                    "{} - could not accept connection: {}",
                    node.host.address, err
                );
            }
        }
    }
}

/// Handles one inbound connection: read the whole frame, decode strictly,
/// learn the sender, dispatch, reply if the type calls for it.
fn handle_connection(node: &Node, mut stream: TcpStream) {
    let payload = match protocol::read_frame(&mut stream) {
        Ok(payload) => payload,
        Err(err) => {
            error!("{} - could not read request: {}", node.host.address, err);
            return;
        }
    };
    if payload.is_empty() {
        return;
    }

    let message = match Message::decode(&payload) {
        Ok(message) => message,
        Err(err) => {
            error!("{} - dropping request: {}", node.host.address, err);
            return;
        }
    };

    // learn the sender on every contact; the envelope is the only way peers
    // ever enter the routing table outside the bootstrap
    let (source_address, source_port) = message.source();
    info!(
        "{} - {:?} from {}:{}",
        node.host.address, message, source_address, source_port
    );
    let sender_uid = Key::for_node(source_address, source_port).to_base64();
    if let Ok(sender) = Host::new(source_address, source_port, &sender_uid) {
        node.lock_routing().add_host(sender);
    }

    let response = match message {
        Message::FindNode { target_uid, .. } => Some(node_list_for(node, &target_uid)),
        Message::FindValue { target_uid, .. } => {
            let value = node.lock_storage().get(&target_uid).map(str::to_string);
            match value {
                Some(value) => Some(Message::Value {
                    source_address: node.host.address.clone(),
                    source_port: node.host.port,
                    key: target_uid,
                    value,
                }),
                None => Some(node_list_for(node, &target_uid)),
            }
        }
        Message::Store { key, value, .. } => {
            node.lock_storage().put(&key, None, &value);
            None
        }
        Message::Ping { .. } => Some(Message::Pong {
            source_address: node.host.address.clone(),
            source_port: node.host.port,
        }),
        Message::NodeList { hosts, .. } => {
            node.lock_routing().add_hosts(hosts);
            None
        }
        Message::Value { key, value, .. } => {
            node.lock_storage().put(&key, None, &value);
            None
        }
        Message::Pong { .. } => None,
    };

    if let Some(response) = response {
        if let Err(err) = protocol::write_message(&mut stream, &response) {
            error!(
                "{} - could not write response: {}",
                node.host.address, err
            );
            return;
        }
        if let Err(err) = stream.shutdown(Shutdown::Write) {
            debug!(
                "{} - could not half-close response stream: {}",
                node.host.address, err
            );
        }
    }
}

/// Builds the NODELIST reply for `target_uid`. A target that does not
/// decode sorts from the zero key, the same treatment unknown identifiers
/// get elsewhere in distance math.
fn node_list_for(node: &Node, target_uid: &str) -> Message {
    let target = Key::from_base64(target_uid).unwrap_or_default();
    let hosts = node.lock_routing().closest_hosts(&target, REPLICATION_PARAM);
    Message::NodeList {
        source_address: node.host.address.clone(),
        source_port: node.host.port,
        hosts,
    }
}
