#[macro_use]
extern crate log;

pub mod config;
pub mod host;
pub mod key;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod storage;

pub use self::config::Configuration;
pub use self::host::Host;
pub use self::key::Key;
pub use self::node::Node;

/// The number of bytes in a key.
const KEY_LENGTH: usize = 20;

/// The number of k-buckets in the routing table.
const ROUTING_TABLE_SIZE: usize = KEY_LENGTH * 8;

/// The maximum number of entries in a k-bucket.
const REPLICATION_PARAM: usize = 3;

/// Time between liveness sweeps of the routing table in seconds.
const PING_INTERVAL: u64 = 20;

/// Time between re-publications of local entries in seconds.
const REPLICATE_INTERVAL: u64 = 60;

/// Connect and read timeout for a single liveness probe in seconds.
const PING_TIMEOUT: u64 = 10;
