//! # Service URIs
//!
//! Services are addressed by a small URI record with the grammar
//! `scheme "://" host [":" port] "/" path`. The scheme names the protocol
//! backend (or the reserved [`PROTO_AUTO`] which tries every registered
//! backend in order), the host is one of the reserved local tokens for the
//! in-process transports, and the path identifies the service endpoint.
//!
//! Two URIs are equal iff protocol, host, and path compare equal as strings
//! and the ports compare equal as integers.

use crate::error::{IocError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved scheme: try each registered protocol backend in order.
pub const PROTO_AUTO: &str = "auto";

/// Scheme of the built-in in-process FIFO backend.
pub const PROTO_FIFO: &str = "fifo";

/// Reserved host token: the current process.
pub const HOST_LOCAL_PROCESS: &str = "localprocess";

/// Reserved host token: loopback.
pub const HOST_LOOPBACK: &str = "localhost";

/// A parsed service address.
///
/// All components are owned strings; copying a URI into a service or link
/// object never borrows from caller memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IocUri {
    /// Protocol backend name, or [`PROTO_AUTO`].
    pub protocol: String,
    /// Host token.
    pub host: String,
    /// Port; `0` when the scheme does not use one.
    pub port: u16,
    /// Endpoint path, without the leading slash.
    pub path: String,
}

impl IocUri {
    /// Build a URI for an in-process endpoint at `path` with auto protocol
    /// selection.
    pub fn auto(path: &str) -> Self {
        Self {
            protocol: PROTO_AUTO.to_string(),
            host: HOST_LOCAL_PROCESS.to_string(),
            port: 0,
            path: path.trim_start_matches('/').to_string(),
        }
    }

    /// Build a URI pinned to the in-process FIFO backend.
    pub fn fifo(path: &str) -> Self {
        Self {
            protocol: PROTO_FIFO.to_string(),
            ..Self::auto(path)
        }
    }

    /// Whether this URI requests auto protocol selection.
    pub fn is_auto_protocol(&self) -> bool {
        self.protocol == PROTO_AUTO
    }

    /// Parse `scheme://host[:port]/path`.
    ///
    /// Returns [`IocError::InvalidParam`] on any grammar violation: missing
    /// scheme separator, empty scheme or host, a non-numeric port, or a
    /// missing path separator.
    pub fn parse(s: &str) -> Result<Self> {
        let (protocol, rest) = s.split_once("://").ok_or(IocError::InvalidParam)?;
        if protocol.is_empty() {
            return Err(IocError::InvalidParam);
        }

        let (authority, path) = rest.split_once('/').ok_or(IocError::InvalidParam)?;
        let (host, port) = match authority.split_once(':') {
            Some((h, p)) => (h, p.parse::<u16>().map_err(|_| IocError::InvalidParam)?),
            None => (authority, 0),
        };
        if host.is_empty() {
            return Err(IocError::InvalidParam);
        }

        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

impl fmt::Display for IocUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == 0 {
            write!(f, "{}://{}/{}", self.protocol, self.host, self.path)
        } else {
            write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test the round trip through parse and display.
    #[test]
    fn test_parse_roundtrip() {
        let uri = IocUri::parse("fifo://localprocess/sensors/imu").unwrap();
        assert_eq!(uri.protocol, "fifo");
        assert_eq!(uri.host, HOST_LOCAL_PROCESS);
        assert_eq!(uri.port, 0);
        assert_eq!(uri.path, "sensors/imu");
        assert_eq!(uri.to_string(), "fifo://localprocess/sensors/imu");
    }

    /// Test parsing with an explicit port.
    #[test]
    fn test_parse_with_port() {
        let uri = IocUri::parse("tcp://localhost:9090/svc").unwrap();
        assert_eq!(uri.port, 9090);
        assert_eq!(uri.to_string(), "tcp://localhost:9090/svc");
    }

    /// Test that grammar violations are rejected.
    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["noscheme/path", "://host/path", "fifo://", "fifo://host", "fifo://h:xx/p"] {
            assert_eq!(IocUri::parse(bad).unwrap_err(), IocError::InvalidParam, "input: {bad}");
        }
    }

    /// Test componentwise equality.
    #[test]
    fn test_componentwise_equality() {
        assert_eq!(IocUri::auto("svc"), IocUri::auto("/svc"));
        assert_ne!(IocUri::auto("svc"), IocUri::fifo("svc"));
        let mut a = IocUri::fifo("svc");
        let b = a.clone();
        a.port = 1;
        assert_ne!(a, b);
    }
}
