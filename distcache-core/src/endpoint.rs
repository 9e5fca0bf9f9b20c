use std::fmt::{Display, Formatter, Result as FmtResult};

use serde_derive::{Deserialize, Serialize};

/// A host/port pair naming one node. Resolution (IP literal or DNS) happens
/// lazily, at socket-acquisition time, inside whichever [`crate::socket::Connection`]
/// implementation performs the actual `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string, as accepted in `ClientConfig::servers`.
    pub fn parse(addr: &str) -> Option<Self> {
        let (host, port) = addr.rsplit_once(':')?;
        let port = port.parse().ok()?;
        Some(Self::new(host, port))
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn test_parse() {
        let e = Endpoint::parse("cache-1.internal:11211").unwrap();
        assert_eq!(e.host, "cache-1.internal");
        assert_eq!(e.port, 11211);
        assert_eq!(e.authority(), "cache-1.internal:11211");
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!(Endpoint::parse("cache-1.internal").is_none());
    }
}
