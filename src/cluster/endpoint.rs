use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LindenError, Result};

/// Network address of one node, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
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

    pub fn parse(address: &str) -> Result<Self> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            LindenError::invalid_argument(format!("endpoint '{address}' is not host:port"))
        })?;
        if host.is_empty() {
            return Err(LindenError::invalid_argument(format!(
                "endpoint '{address}' has no host"
            )));
        }
        let port = port.parse().map_err(|_| {
            LindenError::invalid_argument(format!("endpoint '{address}' has a bad port"))
        })?;
        Ok(Self::new(host, port))
    }
}

impl FromStr for Endpoint {
    type Err = LindenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let endpoint: Endpoint = "10.0.0.7:7700".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("10.0.0.7", 7700));
        assert_eq!(endpoint.to_string(), "10.0.0.7:7700");

        assert!(Endpoint::parse("no-port").is_err());
        assert!(Endpoint::parse(":80").is_err());
        assert!(Endpoint::parse("host:http").is_err());
    }
}
