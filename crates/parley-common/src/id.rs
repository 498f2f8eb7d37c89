use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique id for messages and conversations (uuid v4, hyphenated).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Eight hex characters tagging the log lines of one turn.
pub fn new_correlation_id() -> String {
    let mut simple = uuid::Uuid::new_v4().simple().to_string();
    simple.truncate(8);
    simple
}

pub fn new_connection_id() -> ConnectionId {
    ConnectionId(new_id())
}

/// Identifier of one client connection. Keys the session arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_v4_and_distinct() {
        let a = new_id();
        let parsed = uuid::Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(a, new_id());
    }

    #[test]
    fn correlation_id_is_short_hex() {
        let cid = new_correlation_id();
        assert_eq!(cid.len(), 8);
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn connection_ids() {
        let fixed = ConnectionId::from("conn-1");
        assert_eq!(fixed.as_str(), "conn-1");
        assert_eq!(fixed.to_string(), "conn-1");
        assert_eq!(
            serde_json::to_string(&fixed).unwrap(),
            "\"conn-1\""
        );
        assert_ne!(new_connection_id(), new_connection_id());
    }
}
