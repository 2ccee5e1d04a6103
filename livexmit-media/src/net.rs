//! Address helpers shared by the network media.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

// ---

use livexmit_domain::{Result, UriDescriptor, XmitError};

// ---

/// Lowest port a network medium may use.
const MIN_PORT: u16 = 1025;

/// The URI's port, which must be present and above the privileged range.
pub(crate) fn network_port(uri: &UriDescriptor) -> Result<u16> {
    // ---
    match uri.port() {
        Some(p) if p >= MIN_PORT => Ok(p),
        _ => Err(XmitError::config(format!(
            "port value missing, invalid or not above 1024: {uri}"
        ))),
    }
}

/// Resolve `host:port`; an empty host is the IPv4 wildcard.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    // ---
    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| XmitError::config(format!("cannot resolve '{host}': {e}")))?
        .next()
        .ok_or_else(|| XmitError::config(format!("'{host}' resolved to no address")))
}

/// The wildcard address in the same family as `like`.
pub(crate) fn wildcard(like: &SocketAddr, port: u16) -> SocketAddr {
    // ---
    match like {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn port_must_be_unprivileged() {
        // ---
        let ok = UriDescriptor::parse("udp://:5000").unwrap();
        assert_eq!(network_port(&ok).unwrap(), 5000);

        for bad in ["udp://:1024", "udp://:80", "lrt://host", "lrt://host:http"] {
            let uri = UriDescriptor::parse(bad).unwrap();
            assert!(network_port(&uri).is_err(), "{bad} should be rejected");
        }
    }

    // ---

    #[test]
    fn resolve_literals_and_wildcard() {
        // ---
        assert_eq!(resolve("", 4000).unwrap(), "0.0.0.0:4000".parse().unwrap());
        assert_eq!(resolve("127.0.0.1", 4000).unwrap(), "127.0.0.1:4000".parse().unwrap());
        assert_eq!(resolve("::1", 4000).unwrap(), "[::1]:4000".parse().unwrap());

        let v6: SocketAddr = "[::1]:9".parse().unwrap();
        assert_eq!(wildcard(&v6, 7000), "[::]:7000".parse().unwrap());
    }
}
