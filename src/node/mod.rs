mod service;

use std::collections::HashSet;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::host::Host;
use crate::key::Key;
use crate::protocol::{self, Message, ProtocolError};
use crate::routing::RoutingTable;
use crate::storage::KeyValueStore;
use crate::{PING_INTERVAL, PING_TIMEOUT, REPLICATE_INTERVAL, REPLICATION_PARAM};

/// A DHT node: the local half of the put/lookup interface plus the
/// peer-facing wire service.
///
/// `Node` is a cheap handle; clones share the routing table and key-value
/// store. Construction starts the inbound service loop, performs the
/// bootstrap join when a seed peer is configured, and launches the pinger
/// and the replicator.
#[derive(Clone)]
pub struct Node {
    host: Host,
    key: Key,
    routing_table: Arc<Mutex<RoutingTable>>,
    storage: Arc<Mutex<KeyValueStore>>,
}

impl Node {
    /// Starts a node serving on `addr:port`. When `boot_addr` is non-empty
    /// and `boot_port` is positive, the node joins the network through that
    /// seed peer; a failed join is logged and leaves the node with a nearly
    /// empty routing table rather than preventing startup.
    pub fn new(
        addr: &str,
        port: u16,
        boot_addr: &str,
        boot_port: u16,
    ) -> Result<Node, ProtocolError> {
        let key = Key::for_node(addr, port);
        let host = Host::new(addr, port, &key.to_base64())?;
        let node = Node {
            host,
            key,
            routing_table: Arc::new(Mutex::new(RoutingTable::new(key))),
            storage: Arc::new(Mutex::new(KeyValueStore::new())),
        };

        service::start(node.clone());

        if !boot_addr.is_empty() && boot_port > 0 {
            node.bootstrap(boot_addr, boot_port);
        }

        node.start_pinger();
        node.start_replicator();
        Ok(node)
    }

    /// The node's identifier in base64 form.
    pub fn uid(&self) -> String {
        self.key.to_base64()
    }

    /// A dump of every bucket and its hosts, for the CLI.
    pub fn routes(&self) -> String {
        self.lock_routing().to_string()
    }

    /// A dump of the local key-value store, for the CLI.
    pub fn kv_store(&self) -> String {
        self.lock_storage().to_string()
    }

    /// Stores `value` under `key` locally and at the k closest known peers.
    /// Per-peer send failures are logged and do not abort the remaining
    /// sends; no responses are expected.
    pub fn put(&self, key: &str, value: &str) {
        if key.is_empty() || value.is_empty() {
            error!(
                "{} - put called with an empty key or value",
                self.host.address
            );
            return;
        }
        let target = Key::for_content(key);
        let uid = target.to_base64();
        self.lock_storage().put(&uid, Some(key), value);

        let closest = self.lock_routing().closest_hosts(&target, REPLICATION_PARAM);
        let request = Message::Store {
            source_address: self.host.address.clone(),
            source_port: self.host.port,
            key: uid,
            value: value.to_string(),
        };
        for peer in closest {
            if let Err(err) = self.send_to(&peer, &request) {
                error!(
                    "{} - could not send STORE to {}:{}: {}",
                    self.host.address, peer.address, peer.port, err
                );
            }
        }
    }

    /// Looks `key` up: from the local store when possible, otherwise through
    /// a single FINDVALUE round against the k closest known peers. A remote
    /// hit is cached locally and returned immediately; peers learned from
    /// NODELIST replies enlarge the routing table for future calls but are
    /// not contacted during this one.
    pub fn get(&self, key: &str) -> Option<String> {
        let target = Key::for_content(key);
        let uid = target.to_base64();
        if let Some(value) = self.lock_storage().get(&uid) {
            return Some(value.to_string());
        }

        let closest = self.lock_routing().closest_hosts(&target, REPLICATION_PARAM);
        let request = Message::FindValue {
            source_address: self.host.address.clone(),
            source_port: self.host.port,
            target_uid: uid.clone(),
        };
        for peer in closest {
            match self.exchange_with(&peer.address, peer.port, &request) {
                Ok(Message::Value { value, .. }) => {
                    // the wire does not carry the original key
                    self.lock_storage().put(&uid, None, &value);
                    return Some(value);
                }
                Ok(Message::NodeList { hosts, .. }) => {
                    self.lock_routing().add_hosts(hosts);
                }
                Ok(_) => {}
                Err(err) => {
                    error!(
                        "{} - lookup via {}:{} failed: {}",
                        self.host.address, peer.address, peer.port, err
                    );
                }
            }
        }
        None
    }

    /// Joins the network: inserts the seed peer, then asks it for the peers
    /// nearest our own key and folds the answer into the routing table.
    fn bootstrap(&self, boot_addr: &str, boot_port: u16) {
        let boot_key = Key::for_node(boot_addr, boot_port);
        match Host::new(boot_addr, boot_port, &boot_key.to_base64()) {
            Ok(boot_host) => self.lock_routing().add_host(boot_host),
            Err(err) => {
                error!(
                    "{} - invalid bootstrap peer {}:{}: {}",
                    self.host.address, boot_addr, boot_port, err
                );
                return;
            }
        }

        let request = Message::FindNode {
            source_address: self.host.address.clone(),
            source_port: self.host.port,
            target_uid: self.key.to_base64(),
        };
        match self.exchange_with(boot_addr, boot_port, &request) {
            Ok(Message::NodeList { hosts, .. }) => self.lock_routing().add_hosts(hosts),
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "{} - bootstrap against {}:{} failed: {}",
                    self.host.address, boot_addr, boot_port, err
                );
            }
        }
    }

    fn start_pinger(&self) {
        let node = self.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(PING_INTERVAL));
            node.ping_all_peers();
        });
    }

    /// One liveness sweep: every known peer is probed once; peers that do
    /// not answer with a PONG are evicted.
    fn ping_all_peers(&self) {
        let hosts = self.lock_routing().all_hosts();
        let mut seen = HashSet::new();
        for peer in hosts {
            if !seen.insert(peer.uid.clone()) {
                continue;
            }
            if self.ping(&peer) {
                continue;
            }
            self.lock_routing().remove_host(&peer.uid);
            warn!(
                "{} - removed unreachable peer {}:{}",
                self.host.address, peer.address, peer.port
            );
        }
    }

    fn ping(&self, peer: &Host) -> bool {
        let request = Message::Ping {
            source_address: self.host.address.clone(),
            source_port: self.host.port,
        };
        match self.probe(peer, &request) {
            Ok(Message::Pong { .. }) => true,
            Ok(_) | Err(_) => false,
        }
    }

    /// A request/response exchange with explicit connect and read deadlines.
    fn probe(&self, peer: &Host, request: &Message) -> Result<Message, ProtocolError> {
        let addr = (peer.address.as_str(), peer.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "peer address did not resolve")
            })?;
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(PING_TIMEOUT))?;
        stream.set_read_timeout(Some(Duration::from_secs(PING_TIMEOUT)))?;
        protocol::exchange(&mut stream, request)
    }

    fn start_replicator(&self) {
        let node = self.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(REPLICATE_INTERVAL));
            node.replicate_entries();
        });
    }

    /// One re-publication pass: every local entry is re-sent to the k peers
    /// currently closest to its identifier. Peers that received the entry at
    /// put time may have restarted or been displaced by closer peers learned
    /// since. Send failures stay quiet; the pinger owns peer culling.
    fn replicate_entries(&self) {
        let entries = self.lock_storage().all_entries();
        if entries.is_empty() {
            return;
        }
        for (uid, entry) in entries {
            let target = match Key::from_base64(&uid) {
                Some(target) => target,
                None => continue,
            };
            let closest = self.lock_routing().closest_hosts(&target, REPLICATION_PARAM);
            let request = Message::Store {
                source_address: self.host.address.clone(),
                source_port: self.host.port,
                key: uid.clone(),
                value: entry.value.clone(),
            };
            for peer in closest {
                if self.send_to(&peer, &request).is_err() {
                    debug!(
                        "{} - replication to {}:{} failed",
                        self.host.address, peer.address, peer.port
                    );
                }
            }
        }
    }

    fn send_to(&self, peer: &Host, message: &Message) -> Result<(), ProtocolError> {
        let mut stream = TcpStream::connect((peer.address.as_str(), peer.port))?;
        protocol::write_message(&mut stream, message)
    }

    fn exchange_with(
        &self,
        addr: &str,
        port: u16,
        request: &Message,
    ) -> Result<Message, ProtocolError> {
        let mut stream = TcpStream::connect((addr, port))?;
        protocol::exchange(&mut stream, request)
    }

    fn lock_routing(&self) -> MutexGuard<'_, RoutingTable> {
        match self.routing_table.lock() {
            Ok(routing_table) => routing_table,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_storage(&self) -> MutexGuard<'_, KeyValueStore> {
        match self.storage.lock() {
            Ok(storage) => storage,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
