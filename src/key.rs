use std::fmt::{Debug, Display, Formatter, Result};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::KEY_LENGTH;

/// A 160-bit identifier.
///
/// Keys travel on the wire as the standard base64 encoding of their 20-byte
/// SHA-1 digest; all distance math happens on the raw bytes. The derived
/// `Ord` compares big-endian, so sorting XOR results orders by distance.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Default, Copy)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        let hex_vec: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", hex_vec.join(""))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Key {
    pub fn new(data: [u8; KEY_LENGTH]) -> Self {
        Key(data)
    }

    /// Derives the key identifying the node listening on `addr:port`:
    /// SHA-1 over the UTF-8 address bytes followed by the port as a
    /// big-endian 32-bit integer.
    pub fn for_node(addr: &str, port: u16) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(addr.as_bytes());
        hasher.update(u32::from(port).to_be_bytes());
        Key::from_digest(hasher)
    }

    /// Derives the key under which values for `key` are stored: SHA-1 over
    /// the UTF-8 bytes of the key string.
    pub fn for_content(key: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        Key::from_digest(hasher)
    }

    fn from_digest(hasher: Sha1) -> Self {
        let digest = hasher.finalize();
        let mut data = [0; KEY_LENGTH];
        data.copy_from_slice(&digest);
        Key(data)
    }

    /// Decodes a base64 identifier. A key is well-formed iff decoding yields
    /// exactly `KEY_LENGTH` bytes.
    pub fn from_base64(uid: &str) -> Option<Self> {
        let bytes = STANDARD.decode(uid).ok()?;
        if bytes.len() != KEY_LENGTH {
            return None;
        }
        let mut data = [0; KEY_LENGTH];
        data.copy_from_slice(&bytes);
        Some(Key(data))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn xor(&self, key: &Key) -> Key {
        let mut ret = [0; KEY_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = self.0[i] ^ key.0[i];
        }
        Key(ret)
    }

    pub fn leading_zeros(&self) -> usize {
        let mut ret = 0;
        for i in 0..KEY_LENGTH {
            if self.0[i] == 0 {
                ret += 8
            } else {
                return ret + self.0[i].leading_zeros() as usize;
            }
        }
        ret
    }

    /// The number of leading bits this key shares with `key`. Identical keys
    /// share all `KEY_LENGTH * 8` bits.
    pub fn shared_prefix_bits(&self, key: &Key) -> usize {
        self.xor(key).leading_zeros()
    }
}
