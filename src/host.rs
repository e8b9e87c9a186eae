use std::fmt::{self, Debug, Formatter};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_derive::Serialize;

use crate::key::Key;
use crate::protocol::ProtocolError;

/// A routing record identifying a peer node.
///
/// Hosts are owned by the routing table and travel by value on the wire as
/// `{"addr": …, "port": …, "uid": …}`.
#[derive(Serialize, PartialEq, Eq, Hash, Clone)]
pub struct Host {
    #[serde(rename = "addr")]
    pub address: String,
    pub port: u16,
    pub uid: String,
}

impl Debug for Host {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}:{} - {}", self.address, self.port, self.uid)
    }
}

impl Host {
    /// Builds a host record. A supplied `uid` that is not valid base64 is
    /// re-encoded as the base64 of its UTF-8 bytes; this tolerates CLI- and
    /// config-supplied identifiers. Identifiers derived internally always
    /// decode cleanly and are kept verbatim.
    pub fn new(address: &str, port: u16, uid: &str) -> Result<Host, ProtocolError> {
        if address.trim().is_empty() {
            return Err(ProtocolError::InvalidInput(
                "host address is empty".to_string(),
            ));
        }
        if uid.trim().is_empty() {
            return Err(ProtocolError::InvalidInput("host uid is empty".to_string()));
        }
        let uid = if STANDARD.decode(uid).is_ok() {
            uid.to_string()
        } else {
            STANDARD.encode(uid.as_bytes())
        };
        Ok(Host {
            address: address.to_string(),
            port,
            uid,
        })
    }

    /// The host's identifier in key form, if it decodes to a well-formed
    /// 160-bit identifier.
    pub fn key(&self) -> Option<Key> {
        Key::from_base64(&self.uid)
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::Host;
    use crate::key::Key;

    #[test]
    fn test_valid_uid_kept_verbatim() {
        let uid = Key::for_node("127.0.0.1", 5000).to_base64();
        let host = Host::new("127.0.0.1", 5000, &uid).unwrap();
        assert_eq!(host.uid, uid);
        assert!(host.key().is_some());
    }

    #[test]
    fn test_non_base64_uid_is_coerced() {
        let host = Host::new("127.0.0.1", 5000, "not base64!").unwrap();
        assert_ne!(host.uid, "not base64!");
        assert!(STANDARD.decode(&host.uid).is_ok());
        // a coerced identifier is not a well-formed 160-bit key
        assert!(host.key().is_none());
    }

    #[test]
    fn test_rejects_empty_fields() {
        assert!(Host::new("", 5000, "abc").is_err());
        assert!(Host::new("127.0.0.1", 5000, "").is_err());
        assert!(Host::new("   ", 5000, "abc").is_err());
    }
}
