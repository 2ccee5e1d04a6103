//! UDP media.
//!
//! Setup follows one recipe for both roles: create a non-blocking socket
//! with address reuse, resolve `host:port`, join the group when the address
//! is multicast, then apply `ttl` and the UDP option table. A malformed
//! `ttl` is a configuration error; socket option failures are warnings. The source binds the address; the target sends to it.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

// ---

use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

// ---

use livexmit_domain::{
    is_false_name, ConnParams, Medium, Result, Source, Target, TransmitConfig, UriDescriptor,
    XmitError,
};

// ---

use crate::net::{network_port, resolve};

// ---

fn setup_err(step: &'static str, e: io::Error) -> XmitError {
    XmitError::Connection {
        step,
        code: e.raw_os_error().unwrap_or(-1),
        message: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Create and configure the socket for `host:port`.
fn setup(host: &str, port: u16, params: &ConnParams) -> Result<(Socket, SocketAddr)> {
    // ---
    let mut par = params.clone();
    let addr = resolve(host, port)?;

    let sock = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| setup_err("socket", e))?;
    sock.set_reuse_address(true)
        .map_err(|e| setup_err("socket", e))?;
    sock.set_nonblocking(true)
        .map_err(|e| setup_err("socket", e))?;

    let is_multicast = wants_group(addr, &mut par)?;
    let adapter = par.take("adapter");

    if is_multicast {
        match addr.ip() {
            IpAddr::V4(group) => {
                let iface = match adapter.as_deref() {
                    None | Some("") => Ipv4Addr::UNSPECIFIED,
                    Some(a) => a.parse().map_err(|_| {
                        XmitError::config(format!("adapter '{a}' is not an IPv4 address"))
                    })?,
                };
                sock.join_multicast_v4(&group, &iface)
                    .map_err(|e| setup_err("join", e))?;
                info!(%group, %iface, "joined multicast group");
            }
            IpAddr::V6(group) => {
                sock.join_multicast_v6(&group, 0)
                    .map_err(|e| setup_err("join", e))?;
                info!(%group, "joined multicast group");
            }
        }
    }

    if let Some(ttl) = par.take_parsed::<u32>("ttl")? {
        set_ttl(&sock, addr, ttl);
    }

    for (name, value) in par.iter() {
        apply_option(&sock, addr, name, value);
    }

    Ok((sock, addr))
}

/// Whether to join `addr` as a group. A multicast address is joined with
/// or without the `multicast` flag; the flag on a unicast address is an
/// error. The flag is consumed.
fn wants_group(addr: SocketAddr, par: &mut ConnParams) -> Result<bool> {
    // ---
    let is_multicast = addr.ip().is_multicast();
    if par.take("multicast").is_some() && !is_multicast {
        return Err(XmitError::config(format!(
            "multicast requested but {} is not a multicast address",
            addr.ip()
        )));
    }
    Ok(is_multicast)
}

fn set_ttl(sock: &Socket, addr: SocketAddr, ttl: u32) {
    // ---
    let (unicast, multicast) = match addr {
        SocketAddr::V4(_) => (sock.set_ttl(ttl), sock.set_multicast_ttl_v4(ttl)),
        SocketAddr::V6(_) => (
            sock.set_unicast_hops_v6(ttl),
            sock.set_multicast_hops_v6(ttl),
        ),
    };
    if let Err(e) = unicast {
        warn!(ttl, error = %e, "unicast ttl not applied");
    }
    if let Err(e) = multicast {
        warn!(ttl, error = %e, "multicast ttl not applied");
    }
}

/// UDP option table: `iptos` (int), `mcloop` (bool).
fn apply_option(sock: &Socket, addr: SocketAddr, name: &str, value: &str) {
    // ---
    let result = match name {
        "iptos" => match value.parse::<u32>() {
            Ok(tos) if addr.is_ipv4() => sock.set_tos(tos),
            Ok(_) => Err(io::Error::new(io::ErrorKind::Unsupported, "iptos is IPv4 only")),
            Err(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "not an integer")),
        },
        "mcloop" => {
            let on = !is_false_name(value);
            match addr {
                SocketAddr::V4(_) => sock.set_multicast_loop_v4(on),
                SocketAddr::V6(_) => sock.set_multicast_loop_v6(on),
            }
        }
        _ => {
            warn!(option = name, value, "unknown option ignored");
            return;
        }
    };
    if let Err(e) = result {
        warn!(option = name, value, error = %e, "option not applied");
    }
}

// ---------------------------------------------------------------------------
// UdpSource
// ---------------------------------------------------------------------------

pub struct UdpSource {
    // ---
    uri: UriDescriptor,
    sock: Option<UdpSocket>,
    eof: bool,
}

impl UdpSource {
    // ---

    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let port = network_port(uri)?;
        let (sock, addr) = setup(uri.host(), port, uri.params())?;
        sock.bind(&addr.into()).map_err(|e| setup_err("bind", e))?;
        info!(%addr, "udp source bound");

        Ok(Self {
            uri: uri.clone(),
            sock: Some(UdpSocket::from_std(sock.into())),
            eof: false,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sock.as_ref().and_then(|s| s.local_addr().ok())
    }
}

impl Medium for UdpSource {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.sock.is_some() && !self.eof
    }

    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<bool> {
        match self.sock.as_mut() {
            Some(s) => registry.register(s, token, interest).map(|_| true),
            None => Ok(false),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self.sock.as_mut() {
            Some(s) => registry.deregister(s),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.sock = None;
    }
}

impl Source for UdpSource {
    // ---

    /// One datagram per call. Any failure other than would-block ends the
    /// source for good.
    fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        // ---
        let Some(sock) = self.sock.as_ref() else {
            return Ok(None);
        };
        if self.eof {
            return Ok(None);
        }

        let mut buf = vec![0u8; max];
        loop {
            match sock.recv_from(&mut buf) {
                Ok((0, _)) => continue,
                Ok((n, _)) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, uri = %self.uri, "udp receive failed");
                    self.eof = true;
                    return Ok(None);
                }
            }
        }
    }

    fn end(&self) -> bool {
        self.eof
    }
}

// ---------------------------------------------------------------------------
// UdpTarget
// ---------------------------------------------------------------------------

pub struct UdpTarget {
    // ---
    uri: UriDescriptor,
    sock: Option<UdpSocket>,
    dest: SocketAddr,
}

impl UdpTarget {
    // ---

    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let port = network_port(uri)?;
        let (sock, dest) = setup(uri.host(), port, uri.params())?;
        info!(%dest, "udp target ready");

        Ok(Self {
            uri: uri.clone(),
            sock: Some(UdpSocket::from_std(sock.into())),
            dest,
        })
    }
}

impl Medium for UdpTarget {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.sock.is_some()
    }

    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<bool> {
        match self.sock.as_mut() {
            Some(s) => registry.register(s, token, interest).map(|_| true),
            None => Ok(false),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self.sock.as_mut() {
            Some(s) => registry.deregister(s),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.sock = None;
    }
}

impl Target for UdpTarget {
    // ---
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        // ---
        let Some(sock) = self.sock.as_ref() else {
            return Err(XmitError::Transmission {
                step: "sendto",
                code: -1,
                message: "socket closed".into(),
            });
        };
        match sock.send_to(chunk, self.dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(len = chunk.len(), "udp send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(XmitError::Transmission {
                step: "sendto",
                code: e.raw_os_error().unwrap_or(-1),
                message: e.to_string(),
            }),
        }
    }

    /// Datagram targets never break.
    fn broken(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::time::{Duration, Instant};

    use super::*;

    // ---

    fn uri(s: &str) -> UriDescriptor {
        UriDescriptor::parse(s).unwrap()
    }

    fn free_udp_port() -> u16 {
        // ---
        let s = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        s.local_addr().unwrap().port()
    }

    // ---

    #[test]
    fn unicast_source_and_target() {
        // ---
        let cfg = TransmitConfig::default();
        let port = free_udp_port();
        let mut src = UdpSource::open(&uri(&format!("udp://127.0.0.1:{port}")), &cfg).unwrap();
        let mut tar = UdpTarget::open(&uri(&format!("udp://127.0.0.1:{port}?ttl=8")), &cfg).unwrap();

        assert_eq!(src.read(1316).unwrap(), None, "nothing sent yet");

        tar.write(b"datagram-1").unwrap();
        tar.write(b"datagram-2").unwrap();

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while got.len() < 2 && Instant::now() < deadline {
            match src.read(1316).unwrap() {
                Some(chunk) => got.push(chunk),
                None => std::thread::sleep(Duration::from_millis(2)),
            }
        }
        assert_eq!(got, vec![b"datagram-1".to_vec(), b"datagram-2".to_vec()]);
        assert!(!tar.broken());
        assert!(src.is_open() && !src.end());
    }

    // ---

    #[test]
    fn read_respects_chunk_size() {
        // ---
        let cfg = TransmitConfig::default();
        let port = free_udp_port();
        let mut src = UdpSource::open(&uri(&format!("udp://127.0.0.1:{port}")), &cfg).unwrap();
        let mut tar = UdpTarget::open(&uri(&format!("udp://127.0.0.1:{port}")), &cfg).unwrap();

        tar.write(&[9u8; 100]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let chunk = loop {
            if let Some(c) = src.read(10).unwrap() {
                break c;
            }
            assert!(Instant::now() < deadline, "datagram never arrived");
            std::thread::sleep(Duration::from_millis(2));
        };
        assert_eq!(chunk.len(), 10);
    }

    // ---

    #[test]
    fn multicast_flag_needs_group_address() {
        // ---
        let cfg = TransmitConfig::default();
        let err = UdpSource::open(&uri("udp://127.0.0.1:5999?multicast=1"), &cfg)
            .err()
            .expect("unicast address with multicast flag");
        assert!(matches!(err, XmitError::Configuration(_)), "got {err:?}");
    }

    // ---

    #[test]
    fn group_address_joins_without_flag() {
        // ---
        let group: SocketAddr = "239.255.0.1:5000".parse().unwrap();
        let mut par = ConnParams::new();
        assert!(wants_group(group, &mut par).unwrap(), "239.x is joined implicitly");

        let mut par: ConnParams = [("multicast", "1")].into_iter().collect();
        assert!(wants_group(group, &mut par).unwrap());
        assert!(!par.contains("multicast"), "flag consumed");

        let unicast: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(!wants_group(unicast, &mut ConnParams::new()).unwrap());
    }

    // ---

    #[test]
    fn unknown_options_only_warn() {
        // ---
        let cfg = TransmitConfig::default();
        let port = free_udp_port();
        let tar = UdpTarget::open(
            &uri(&format!("udp://127.0.0.1:{port}?iptos=16&mcloop=0&bogus=1&ttl=4")),
            &cfg,
        );
        assert!(tar.is_ok(), "option failures are warnings");
    }

    // ---

    #[test]
    fn malformed_ttl_is_configuration_error() {
        // ---
        let cfg = TransmitConfig::default();
        let port = free_udp_port();
        let err = UdpTarget::open(&uri(&format!("udp://127.0.0.1:{port}?ttl=x")), &cfg)
            .err()
            .expect("ttl=x must fail");
        match err {
            XmitError::Configuration(msg) => assert!(msg.contains("ttl"), "got: {msg}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    // ---

    #[test]
    fn send_failure_is_transmission_error() {
        // ---
        let cfg = TransmitConfig::default();
        let port = free_udp_port();
        let mut tar = UdpTarget::open(&uri(&format!("udp://127.0.0.1:{port}")), &cfg).unwrap();

        // Larger than any UDP datagram can be.
        let err = tar.write(&vec![0u8; 70_000]).unwrap_err();
        assert!(
            matches!(err, XmitError::Transmission { step: "sendto", .. }),
            "got {err:?}"
        );
    }

    // ---

    #[test]
    fn privileged_port_rejected() {
        // ---
        let cfg = TransmitConfig::default();
        assert!(UdpTarget::open(&uri("udp://127.0.0.1:53"), &cfg).is_err());
    }
}
