use std::fmt::{self, Display, Formatter};

use crate::host::Host;
use crate::key::Key;
use crate::{KEY_LENGTH, REPLICATION_PARAM, ROUTING_TABLE_SIZE};

/// A k-bucket: an insertion-ordered list of at most `REPLICATION_PARAM`
/// hosts, oldest at position 0.
#[derive(Clone, Debug, Default)]
struct RoutingBucket {
    hosts: Vec<Host>,
}

impl RoutingBucket {
    fn update_host(&mut self, host: Host) {
        if let Some(index) = self.hosts.iter().position(|h| h.uid == host.uid) {
            // a re-observed peer keeps its slot
            self.hosts[index] = host;
            return;
        }
        self.hosts.push(host);
        if self.hosts.len() > REPLICATION_PARAM {
            self.hosts.remove(0);
        }
    }

    fn remove_host(&mut self, uid: &str) -> Option<Host> {
        self.hosts
            .iter()
            .position(|h| h.uid == uid)
            .map(|index| self.hosts.remove(index))
    }

    fn get_hosts(&self) -> &[Host] {
        self.hosts.as_slice()
    }
}

/// An implementation of the routing table as a fixed array of k-buckets,
/// bucket `i` holding the peers whose identifier shares exactly `i` leading
/// bits with the local key. The local key is never stored.
pub struct RoutingTable {
    buckets: Vec<RoutingBucket>,
    local: Key,
}

impl RoutingTable {
    pub fn new(local: Key) -> Self {
        RoutingTable {
            buckets: vec![RoutingBucket::default(); ROUTING_TABLE_SIZE],
            local,
        }
    }

    /// Records `host` in the bucket matching its shared prefix with the
    /// local key: replace in place when the uid is already present, append
    /// when there is room, otherwise evict the oldest entry. Hosts whose
    /// identifier equals the local key or does not decode are ignored.
    /// Insertion never probes; the pinger owns removal.
    pub fn add_host(&mut self, host: Host) {
        let index = match self.bucket_index(&host) {
            Some(index) => index,
            None => return,
        };
        self.buckets[index].update_host(host);
    }

    pub fn add_hosts(&mut self, hosts: Vec<Host>) {
        for host in hosts {
            self.add_host(host);
        }
    }

    /// Removes the host with the given uid, wherever it lives. No-op if the
    /// uid is unknown.
    pub fn remove_host(&mut self, uid: &str) {
        for bucket in &mut self.buckets {
            if bucket.remove_host(uid).is_some() {
                return;
            }
        }
    }

    /// Returns up to `count` hosts ordered by increasing XOR distance from
    /// `key`, ties broken by encounter order. This scans every bucket: the
    /// local key is excluded from the table, so a query can land in an empty
    /// bucket whose closest candidates live in adjacent buckets.
    pub fn closest_hosts(&self, key: &Key, count: usize) -> Vec<Host> {
        let mut ret = self.all_hosts();
        ret.sort_by_key(|host| host.key().unwrap_or_default().xor(key));
        ret.truncate(count);
        ret
    }

    pub fn all_hosts(&self) -> Vec<Host> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.get_hosts().iter().cloned())
            .collect()
    }

    fn bucket_index(&self, host: &Host) -> Option<usize> {
        let key = host.key()?;
        let shared = self.local.shared_prefix_bits(&key);
        if shared == KEY_LENGTH * 8 {
            // the local node never routes to itself
            return None;
        }
        Some(shared)
    }
}

impl Display for RoutingTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (index, bucket) in self.buckets.iter().enumerate() {
            writeln!(f, "Bucket {}:", index)?;
            for host in bucket.get_hosts() {
                writeln!(
                    f,
                    "  ID: {}, IP: {}, Port: {}",
                    host.uid, host.address, host.port
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RoutingTable;
    use crate::host::Host;
    use crate::key::Key;
    use crate::{KEY_LENGTH, REPLICATION_PARAM};

    fn key_with_first_byte(byte: u8) -> Key {
        let mut data = [0; KEY_LENGTH];
        data[0] = byte;
        Key::new(data)
    }

    fn host_for(key: Key, port: u16) -> Host {
        Host::new("127.0.0.1", port, &key.to_base64()).unwrap()
    }

    #[test]
    fn test_first_bit_divergence_lands_in_bucket_zero() {
        let table = RoutingTable::new(key_with_first_byte(0));
        let host = host_for(key_with_first_byte(0x80), 5000);
        assert_eq!(table.bucket_index(&host), Some(0));
    }

    #[test]
    fn test_local_key_is_never_inserted() {
        let local = Key::for_node("127.0.0.1", 5000);
        let mut table = RoutingTable::new(local);
        table.add_host(host_for(local, 5000));
        assert!(table.all_hosts().is_empty());
    }

    #[test]
    fn test_undecodable_uid_is_ignored() {
        let mut table = RoutingTable::new(Key::for_node("127.0.0.1", 5000));
        // coerced to base64 of the raw text, which is not 20 bytes
        let host = Host::new("127.0.0.1", 5001, "short uid").unwrap();
        table.add_host(host);
        assert!(table.all_hosts().is_empty());
    }

    #[test]
    fn test_fifo_eviction_and_replace_in_place() {
        let mut table = RoutingTable::new(key_with_first_byte(0));
        // all of these differ from the local key in the first bit
        let keys: Vec<Key> = (0..4).map(|i| key_with_first_byte(0x80 | i)).collect();
        for (i, key) in keys.iter().take(REPLICATION_PARAM).enumerate() {
            table.add_host(host_for(*key, 5000 + i as u16));
        }

        // re-observing the second host must preserve its slot
        table.add_host(host_for(keys[1], 6001));
        let uids: Vec<String> = table.all_hosts().iter().map(|h| h.uid.clone()).collect();
        assert_eq!(
            uids,
            vec![
                keys[0].to_base64(),
                keys[1].to_base64(),
                keys[2].to_base64()
            ]
        );
        assert_eq!(table.all_hosts()[1].port, 6001);

        // a fourth host evicts the oldest
        table.add_host(host_for(keys[3], 5003));
        let uids: Vec<String> = table.all_hosts().iter().map(|h| h.uid.clone()).collect();
        assert_eq!(
            uids,
            vec![
                keys[1].to_base64(),
                keys[2].to_base64(),
                keys[3].to_base64()
            ]
        );
    }

    #[test]
    fn test_bucket_invariant_holds_after_inserts() {
        let local = Key::for_node("127.0.0.1", 5000);
        let mut table = RoutingTable::new(local);
        for port in 5001..5040 {
            let key = Key::for_node("127.0.0.1", port);
            table.add_host(host_for(key, port));
        }
        for (index, bucket) in table.buckets.iter().enumerate() {
            assert!(bucket.get_hosts().len() <= REPLICATION_PARAM);
            for host in bucket.get_hosts() {
                assert_eq!(local.shared_prefix_bits(&host.key().unwrap()), index);
            }
        }
    }

    #[test]
    fn test_closest_hosts_sorted_and_bounded() {
        let mut table = RoutingTable::new(Key::for_node("127.0.0.1", 5000));
        for port in 5001..5011 {
            table.add_host(host_for(Key::for_node("127.0.0.1", port), port));
        }
        let total = table.all_hosts().len();
        let target = Key::for_content("somewhere");

        let closest = table.closest_hosts(&target, 3);
        assert_eq!(closest.len(), 3);
        let distances: Vec<Key> = closest
            .iter()
            .map(|host| host.key().unwrap().xor(&target))
            .collect();
        for pair in distances.windows(2) {
            assert!(pair[0] <= pair[1]);
        }

        assert_eq!(table.closest_hosts(&target, 100).len(), total);
    }

    #[test]
    fn test_remove_host() {
        let mut table = RoutingTable::new(Key::for_node("127.0.0.1", 5000));
        let key = Key::for_node("127.0.0.1", 5001);
        table.add_host(host_for(key, 5001));
        assert_eq!(table.all_hosts().len(), 1);

        table.remove_host(&key.to_base64());
        assert!(table.all_hosts().is_empty());

        // removing an unknown uid is a no-op
        table.remove_host(&key.to_base64());
        assert!(table.all_hosts().is_empty());
    }
}
