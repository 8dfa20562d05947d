//! Node address normalization and validation.
//!
//! Cluster members advertise `ip:port@bus_port`; administrative connections
//! use the client port only. `localhost` is always rewritten to `127.0.0.1`.
//! IPv6 is not supported: any address with more than one colon is rejected.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("malformed address '{0}', expected host:port")]
    Format(String),

    #[error("invalid port '{port}' in address '{address}'")]
    Port { address: String, port: String },

    #[error("port {port} out of range (1-65535) in address '{address}'")]
    PortRange { address: String, port: u32 },
}

/// Parse `host:port`, rewriting empty or `localhost` hosts to `127.0.0.1`
/// and validating the port range.
pub fn parse_address(address: &str) -> Result<(String, u16), AddressError> {
    let stripped = strip_bus_port(address);

    let parts: Vec<&str> = stripped.split(':').collect();
    if parts.len() != 2 {
        return Err(AddressError::Format(address.to_string()));
    }

    let host = match parts[0] {
        "" | "localhost" => "127.0.0.1",
        other => other,
    };

    let port: u32 = parts[1].parse().map_err(|_| AddressError::Port {
        address: address.to_string(),
        port: parts[1].to_string(),
    })?;
    if port < 1 || port > 65535 {
        return Err(AddressError::PortRange {
            address: address.to_string(),
            port,
        });
    }

    Ok((host.to_string(), port as u16))
}

/// Normalize an address for use as a connection key: bus port stripped,
/// `localhost` rewritten. Returns the input unchanged when it does not parse,
/// so display paths never lose information.
pub fn normalize_address(address: &str) -> String {
    match parse_address(address) {
        Ok((host, port)) => format!("{}:{}", host, port),
        Err(_) => strip_bus_port(address).to_string(),
    }
}

/// Drop the `@bus_port` suffix if present.
pub fn strip_bus_port(address: &str) -> &str {
    match address.find('@') {
        Some(idx) => &address[..idx],
        None => address,
    }
}

/// Basic hostname shape check for bootstrap input validation: letters,
/// digits, dots, and interior dashes.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    let bytes = hostname.as_bytes();
    for (i, &ch) in bytes.iter().enumerate() {
        match ch {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' => {}
            b'-' if i > 0 && i < bytes.len() - 1 => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_address() {
        assert_eq!(
            parse_address("192.168.1.100:7001").unwrap(),
            ("192.168.1.100".to_string(), 7001)
        );
    }

    #[test]
    fn strips_bus_port_suffix() {
        assert_eq!(
            parse_address("192.168.1.100:7001@17001").unwrap(),
            ("192.168.1.100".to_string(), 7001)
        );
    }

    #[test]
    fn rewrites_localhost_and_empty_host() {
        assert_eq!(
            parse_address("localhost:7001").unwrap(),
            ("127.0.0.1".to_string(), 7001)
        );
        assert_eq!(
            parse_address(":7001").unwrap(),
            ("127.0.0.1".to_string(), 7001)
        );
    }

    #[test]
    fn rejects_missing_or_extra_colons() {
        assert!(parse_address("192.168.1.100").is_err());
        assert!(parse_address("192.168.1.100:7001:extra").is_err());
        assert!(parse_address("[::1]:7001").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn rejects_bad_ports() {
        assert!(parse_address("host:abc").is_err());
        assert!(parse_address("host:").is_err());
        assert!(parse_address("host:0").is_err());
        assert!(parse_address("host:65536").is_err());
        assert!(parse_address("host:65535").is_ok());
        assert!(parse_address("host:1").is_ok());
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in [
            "localhost:7001@17001",
            "localhost:7001",
            "10.0.0.1:6379",
            ":7001",
        ] {
            let once = normalize_address(input);
            assert_eq!(normalize_address(&once), once, "input {input}");
        }
    }

    #[test]
    fn normalize_keeps_unparseable_input() {
        assert_eq!(normalize_address("not-an-address"), "not-an-address");
        assert_eq!(normalize_address("a:b:c@123"), "a:b:c");
    }

    #[test]
    fn hostname_validation() {
        assert!(is_valid_hostname("valkey-node-1.internal"));
        assert!(is_valid_hostname("node1"));
        assert!(!is_valid_hostname("-leading-dash"));
        assert!(!is_valid_hostname("trailing-dash-"));
        assert!(!is_valid_hostname("with space"));
        assert!(!is_valid_hostname(""));
    }
}
