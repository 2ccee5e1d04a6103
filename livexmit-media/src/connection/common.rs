//! Shared state and establishment logic for LRT media.

use std::io;
use std::net::SocketAddr;

// ---

use mio::{Interest, Registry, Token};
use tracing::{debug, info, warn};

// ---

use livexmit_domain::{is_false_name, ConnParams, Result, Role, SockStatus, XmitError};
use livexmit_lrt::{options, Binding, LrtSocket, LIVE_MAX_PAYLOAD};

// ---

use super::{conn_err, Mode};
use crate::net::{resolve, wildcard};

// ---

/// Listen backlog for listener mode.
const LISTEN_BACKLOG: i32 = 5;

// ---------------------------------------------------------------------------
// ConnCommon
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Settings {
    // ---
    pub role: Role,
    pub mode: Mode,
    /// Local interface: `adapter=`, or the host for a listener.
    pub adapter: String,
    /// Local port for callers and rendezvous peers. Zero until assigned.
    pub outgoing_port: u16,
    /// Set once the outgoing port came from the kernel rather than the URI.
    pub port_captured: bool,
    pub timeout_ms: u64,
    pub tsbpd: bool,
    /// `live` or `file`; applied ahead of every other option.
    pub transtype: Option<String>,
    /// Everything the adapter did not interpret, passed to the socket.
    pub options: ConnParams,
}

pub(crate) struct ConnCommon {
    // ---
    pub settings: Settings,
    /// Listening socket, only in listener mode before the first accept.
    bindsock: Option<LrtSocket>,
    /// The working socket.
    sock: Option<LrtSocket>,
}

impl ConnCommon {
    // ---

    /// Interpret the adapter-level parameters.
    ///
    /// `mode`, `timeout`, `adapter`, `port` and `tsbpd` are consumed. A
    /// `payload_override` becomes the `payloadsize` option unless the
    /// transfer type is `file`. The rest is kept for the socket.
    pub fn configure(
        host: &str,
        params: &ConnParams,
        role: Role,
        payload_override: Option<usize>,
    ) -> Result<Self> {
        // ---
        let mut par = params.clone();

        let mode = match par.take("mode").as_deref() {
            None | Some("") | Some("default") if host.is_empty() => Mode::Listener,
            None | Some("") | Some("default") => Mode::Caller,
            Some("caller") | Some("client") => Mode::Caller,
            Some("listener") | Some("server") => Mode::Listener,
            Some("rendezvous") => Mode::Rendezvous,
            Some(other) => return Err(XmitError::config(format!("invalid mode '{other}'"))),
        };

        let timeout_ms = par.take_parsed::<u64>("timeout")?.unwrap_or(0);

        let adapter = match par.take("adapter") {
            Some(a) => a,
            None if mode == Mode::Listener => host.to_string(),
            None => String::new(),
        };

        let tsbpd = par.take("tsbpd").map_or(true, |v| !is_false_name(&v));
        let outgoing_port = par.take_parsed::<u16>("port")?.unwrap_or(0);
        let transtype = par.take("transtype");

        if let Some(size) = payload_override {
            if transtype.as_deref() != Some("file") {
                if size > LIVE_MAX_PAYLOAD {
                    return Err(XmitError::config(format!(
                        "chunk size {size} exceeds {LIVE_MAX_PAYLOAD} bytes, the live payload limit"
                    )));
                }
                par.insert("payloadsize", size.to_string());
            }
        }

        Ok(Self {
            settings: Settings {
                role,
                mode,
                adapter,
                outgoing_port,
                port_captured: false,
                timeout_ms,
                tsbpd,
                transtype,
                options: par,
            },
            bindsock: None,
            sock: None,
        })
    }

    /// Move the working socket and settings out of `other` into a new core.
    ///
    /// `other` keeps no working handle afterwards. Its listening socket, if
    /// any, stays with it and closes when `other` is dropped.
    pub fn steal_from(other: &mut ConnCommon) -> Self {
        // ---
        let s = &other.settings;
        Self {
            settings: Settings {
                role: s.role,
                mode: s.mode,
                adapter: s.adapter.clone(),
                outgoing_port: s.outgoing_port,
                port_captured: s.port_captured,
                timeout_ms: s.timeout_ms,
                tsbpd: s.tsbpd,
                transtype: s.transtype.clone(),
                options: s.options.clone(),
            },
            bindsock: None,
            sock: other.sock.take(),
        }
    }

    /// Establish according to the mode. Listeners only start listening;
    /// the peer is taken later by [`ConnCommon::accept_new_client`].
    pub fn open(&mut self, host: &str, port: u16) -> Result<()> {
        // ---
        match self.settings.mode {
            Mode::Caller => self.open_client(host, port),
            Mode::Listener => {
                let adapter = self.settings.adapter.clone();
                self.prepare_listener(&adapter, port, LISTEN_BACKLOG)
            }
            Mode::Rendezvous => {
                let adapter = self.settings.adapter.clone();
                self.open_rendezvous(&adapter, host, port)
            }
        }
    }

    pub fn prepare_listener(&mut self, host: &str, port: u16, backlog: i32) -> Result<()> {
        // ---
        let addr = resolve(host, port)?;
        let mut sock = LrtSocket::new();
        self.configure_pre(&mut sock)?;
        sock.bind(addr).map_err(|e| conn_err("bind", e))?;
        sock.listen(backlog).map_err(|e| conn_err("listen", e))?;

        // Stored on the listener, applied to each accepted peer.
        self.configure_post(&mut sock);

        info!(%addr, role = %self.settings.role, "listening");
        self.bindsock = Some(sock);
        Ok(())
    }

    /// Accept one peer and retire the listening socket.
    ///
    /// Returns `Ok(false)` when no peer is pending.
    pub fn accept_new_client(&mut self) -> Result<bool> {
        // ---
        let Some(listener) = self.bindsock.as_mut() else {
            return Ok(false);
        };
        let (sock, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(livexmit_lrt::LrtError::WouldBlock) => return Ok(false),
            Err(e) => return Err(conn_err("accept", e)),
        };

        info!(%peer, role = %self.settings.role, "accepted connection");

        // The peer moves to a fresh core. The old core keeps the listening
        // socket and closes it as it is dropped: one peer per listener.
        self.sock = Some(sock);
        let fresh = ConnCommon::steal_from(self);
        drop(std::mem::replace(self, fresh));
        Ok(true)
    }

    pub fn open_client(&mut self, host: &str, port: u16) -> Result<()> {
        // ---
        let addr = resolve(host, port)?;
        let mut sock = LrtSocket::new();
        self.configure_pre(&mut sock)?;

        if self.settings.outgoing_port != 0 {
            sock.bind(wildcard(&addr, self.settings.outgoing_port))
                .map_err(|e| conn_err("bind", e))?;
        }
        sock.connect(addr).map_err(|e| conn_err("connect", e))?;

        if self.settings.outgoing_port == 0 {
            if let Some(local) = sock.local_addr() {
                self.settings.outgoing_port = local.port();
                self.settings.port_captured = true;
                debug!(port = local.port(), "outgoing port captured for reconnects");
            }
        }

        self.configure_post(&mut sock);
        info!(%addr, role = %self.settings.role, "connecting");
        self.sock = Some(sock);
        Ok(())
    }

    /// Bind `adapter` on the local port and dial `host:port` symmetrically.
    ///
    /// The local port is the `port` parameter when given, else the remote
    /// port.
    pub fn open_rendezvous(&mut self, adapter: &str, host: &str, port: u16) -> Result<()> {
        // ---
        let peer = resolve(host, port)?;
        let local_port = match self.settings.outgoing_port {
            0 => port,
            p => p,
        };
        let local = match adapter {
            "" => wildcard(&peer, local_port),
            a => resolve(a, local_port)?,
        };

        let mut sock = LrtSocket::new();
        sock.set_option("rendezvous", "1")
            .map_err(|e| conn_err("configure-pre", e))?;
        self.configure_pre(&mut sock)?;
        sock.bind(local).map_err(|e| conn_err("bind", e))?;
        sock.connect(peer).map_err(|e| conn_err("connect", e))?;
        self.configure_post(&mut sock);

        info!(%local, %peer, role = %self.settings.role, "rendezvous started");
        self.sock = Some(sock);
        Ok(())
    }

    /// Apply PRE options. A rejected option is a configuration error, so it
    /// is never retried.
    pub fn configure_pre(&self, sock: &mut LrtSocket) -> Result<()> {
        // ---
        let s = &self.settings;
        let pre = |sock: &mut LrtSocket, name: &str, value: &str| {
            sock.set_option(name, value)
                .map_err(|e| XmitError::config(format!("option {name}={value} rejected: {e}")))
        };

        // transtype first so payload limits are judged in the right mode
        if let Some(transtype) = &s.transtype {
            pre(sock, "transtype", transtype)?;
        }
        if !s.tsbpd {
            pre(sock, "tsbpdmode", "0")?;
        }
        if s.role == Role::Target {
            pre(sock, "sender", "1")?;
        }
        if s.timeout_ms > 0 {
            pre(sock, "conntimeo", &s.timeout_ms.to_string())?;
        }

        for (name, value) in s.options.iter() {
            match options::lookup(name) {
                Some(opt) if opt.binding == Binding::Pre => pre(sock, name, value)?,
                Some(_) => {}
                None => warn!(option = name, value, "unknown option ignored"),
            }
        }
        Ok(())
    }

    /// Apply POST options. Failures are logged and skipped.
    pub fn configure_post(&self, sock: &mut LrtSocket) {
        // ---
        let s = &self.settings;
        if s.timeout_ms > 0 {
            if let Err(e) = sock.set_option("sndtimeo", &s.timeout_ms.to_string()) {
                warn!(error = %e, "send timeout not applied");
            }
        }
        for (name, value) in s.options.iter() {
            let is_post = options::lookup(name).is_some_and(|o| o.binding == Binding::Post);
            if !is_post {
                continue;
            }
            if let Err(e) = sock.set_option(name, value) {
                warn!(option = name, value, error = %e, "option not applied");
            }
        }
    }

    // ---

    pub fn sock(&self) -> Option<&LrtSocket> {
        self.sock.as_ref()
    }

    pub fn sock_mut(&mut self) -> Option<&mut LrtSocket> {
        self.sock.as_mut()
    }

    /// True while the working socket is connected.
    pub fn is_connected(&self) -> bool {
        self.sock
            .as_ref()
            .is_some_and(|s| s.state() == SockStatus::Connected)
    }

    /// State of whichever socket is current.
    pub fn status(&mut self) -> SockStatus {
        // ---
        match (self.sock.as_mut(), self.bindsock.as_mut()) {
            (Some(sock), _) => sock.status(),
            (None, Some(listener)) => listener.status(),
            (None, None) => SockStatus::NonExist,
        }
    }

    pub fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<bool> {
        // ---
        match (self.sock.as_mut(), self.bindsock.as_mut()) {
            (Some(sock), _) => registry.register(sock, token, interest).map(|_| true),
            (None, Some(listener)) => registry.register(listener, token, interest).map(|_| true),
            (None, None) => Ok(false),
        }
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        // ---
        match (self.sock.as_mut(), self.bindsock.as_mut()) {
            (Some(sock), _) => registry.deregister(sock),
            (None, Some(listener)) => registry.deregister(listener),
            (None, None) => Ok(()),
        }
    }

    /// `port=<n>` when the kernel picked the outgoing port, so the next
    /// incarnation of this slot dials from the same port.
    pub fn carry_over(&self) -> ConnParams {
        // ---
        let mut carry = ConnParams::new();
        let s = &self.settings;
        if s.mode == Mode::Caller && s.port_captured {
            carry.insert("port", s.outgoing_port.to_string());
        }
        carry
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        // ---
        self.sock
            .as_ref()
            .or(self.bindsock.as_ref())
            .and_then(LrtSocket::local_addr)
    }

    /// Close both sockets. Idempotent.
    pub fn close(&mut self) {
        // ---
        if let Some(mut s) = self.sock.take() {
            s.close();
        }
        if let Some(mut s) = self.bindsock.take() {
            s.close();
        }
    }
}

impl Drop for ConnCommon {
    // ---
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use livexmit_lrt::TransType;

    use super::*;

    // ---

    fn params(pairs: &[(&str, &str)]) -> ConnParams {
        pairs.iter().copied().collect()
    }

    // ---

    #[test]
    fn mode_follows_host_by_default() {
        // ---
        let c = ConnCommon::configure("", &params(&[]), Role::Source, None).unwrap();
        assert_eq!(c.settings.mode, Mode::Listener);

        let c = ConnCommon::configure("10.1.1.1", &params(&[]), Role::Source, None).unwrap();
        assert_eq!(c.settings.mode, Mode::Caller);

        let c = ConnCommon::configure("10.1.1.1", &params(&[("mode", "default")]), Role::Source, None)
            .unwrap();
        assert_eq!(c.settings.mode, Mode::Caller);
    }

    // ---

    #[test]
    fn mode_aliases_and_errors() {
        // ---
        for (value, want) in [
            ("client", Mode::Caller),
            ("caller", Mode::Caller),
            ("server", Mode::Listener),
            ("listener", Mode::Listener),
            ("rendezvous", Mode::Rendezvous),
        ] {
            let c = ConnCommon::configure("h", &params(&[("mode", value)]), Role::Target, None).unwrap();
            assert_eq!(c.settings.mode, want, "mode={value}");
        }

        let err = ConnCommon::configure("h", &params(&[("mode", "broadcast")]), Role::Target, None)
            .err()
            .expect("unknown mode must fail");
        assert!(matches!(err, XmitError::Configuration(_)));
    }

    // ---

    #[test]
    fn adapter_params_are_consumed() {
        // ---
        let p = params(&[
            ("mode", "caller"),
            ("timeout", "250"),
            ("adapter", "10.0.0.2"),
            ("port", "40000"),
            ("tsbpd", "off"),
            ("transtype", "live"),
            ("latency", "120"),
            ("linger", "1"),
        ]);
        let c = ConnCommon::configure("10.0.0.9", &p, Role::Source, None).unwrap();
        let s = &c.settings;
        assert_eq!(s.timeout_ms, 250);
        assert_eq!(s.adapter, "10.0.0.2");
        assert_eq!(s.outgoing_port, 40000);
        assert!(!s.port_captured);
        assert!(!s.tsbpd);
        assert_eq!(s.transtype.as_deref(), Some("live"));
        assert!(!s.options.contains("transtype"), "transtype is not passed through");
        assert_eq!(s.options.len(), 2, "only pass-through options remain");
        assert_eq!(s.options.get("latency"), Some("120"));
        assert_eq!(s.options.get("linger"), Some("1"));
    }

    // ---

    #[test]
    fn listener_adapter_defaults_to_host() {
        // ---
        let c = ConnCommon::configure("127.0.0.1", &params(&[("mode", "listener")]), Role::Source, None)
            .unwrap();
        assert_eq!(c.settings.adapter, "127.0.0.1");
    }

    // ---

    #[test]
    fn payload_override_bounds() {
        // ---
        let c = ConnCommon::configure("h", &params(&[]), Role::Target, Some(1000)).unwrap();
        assert_eq!(c.settings.options.get("payloadsize"), Some("1000"));

        let err = ConnCommon::configure("h", &params(&[]), Role::Target, Some(1500))
            .err()
            .expect("1500 exceeds the live limit");
        assert!(err.to_string().contains("1456"), "got: {err}");

        let c = ConnCommon::configure("h", &params(&[("transtype", "file")]), Role::Target, Some(8000))
            .unwrap();
        assert_eq!(
            c.settings.options.get("payloadsize"),
            None,
            "file transfers ignore the chunk override"
        );
    }

    // ---

    #[test]
    fn bad_timeout_is_configuration_error() {
        // ---
        let err = ConnCommon::configure("h", &params(&[("timeout", "soon")]), Role::Source, None)
            .err()
            .expect("non-numeric timeout must fail");
        assert!(matches!(err, XmitError::Configuration(_)));
    }

    // ---

    #[test]
    fn bad_pre_option_is_hard_failure() {
        // ---
        let c = ConnCommon::configure("", &params(&[("payloadsize", "0")]), Role::Source, None).unwrap();
        let mut sock = LrtSocket::new();
        let err = c.configure_pre(&mut sock).unwrap_err();
        match &err {
            XmitError::Configuration(msg) => assert!(msg.contains("payloadsize"), "got: {msg}"),
            other => panic!("expected configuration failure, got {other:?}"),
        }
        assert!(!err.is_recoverable(), "a rejected option must not be retried");
    }

    // ---

    #[test]
    fn transtype_reaches_the_socket() {
        // ---
        let p = params(&[("payloadsize", "8000"), ("transtype", "file")]);
        let c = ConnCommon::configure("", &p, Role::Target, None).unwrap();
        let mut sock = LrtSocket::new();
        c.configure_pre(&mut sock).unwrap();
        assert!(matches!(sock.config().transtype, TransType::File));
        assert_eq!(sock.config().payload_size, 8000);
    }

    // ---

    #[test]
    fn bad_transtype_is_configuration_error() {
        // ---
        let p = params(&[("transtype", "bulk")]);
        let c = ConnCommon::configure("", &p, Role::Target, None).unwrap();
        let err = c.configure_pre(&mut LrtSocket::new()).unwrap_err();
        assert!(matches!(err, XmitError::Configuration(_)), "got {err:?}");
    }

    // ---

    #[test]
    fn bad_post_option_only_warns() {
        // ---
        let c = ConnCommon::configure("", &params(&[("linger", "forever")]), Role::Source, None).unwrap();
        let mut sock = LrtSocket::new();
        c.configure_pre(&mut sock).unwrap();
        c.configure_post(&mut sock);
        assert_eq!(sock.config().linger, None);
    }

    // ---

    #[test]
    fn listener_is_one_shot() {
        // ---
        let mut listener =
            ConnCommon::configure("127.0.0.1", &params(&[]), Role::Source, None).unwrap();
        listener.prepare_listener("127.0.0.1", 0, 5).unwrap();
        assert_eq!(listener.status(), SockStatus::Listening);
        assert!(!listener.accept_new_client().unwrap(), "nobody is dialling yet");
        let addr = listener.local_addr().unwrap();

        let mut caller = ConnCommon::configure("127.0.0.1", &params(&[]), Role::Target, None).unwrap();
        caller.open_client("127.0.0.1", addr.port()).unwrap();
        assert!(caller.settings.port_captured);
        assert_eq!(
            caller.carry_over().get("port"),
            Some(caller.settings.outgoing_port.to_string().as_str())
        );

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !listener.accept_new_client().unwrap() {
            assert!(std::time::Instant::now() < deadline, "accept timed out");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(listener.bindsock.is_none(), "listening socket retired after accept");
        assert_eq!(listener.status(), SockStatus::Connected);

        let refused = std::net::TcpStream::connect(addr);
        assert!(refused.is_err(), "no second peer can reach a retired listener");
    }

    // ---

    #[test]
    fn accepted_peer_gets_post_options_once_stored() {
        // ---
        let p = params(&[("mode", "listener"), ("linger", "2")]);
        let mut listener = ConnCommon::configure("127.0.0.1", &p, Role::Source, None).unwrap();
        listener.prepare_listener("127.0.0.1", 0, 5).unwrap();
        let addr = listener.local_addr().unwrap();

        let _peer = std::net::TcpStream::connect(addr).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !listener.accept_new_client().unwrap() {
            assert!(std::time::Instant::now() < deadline, "accept timed out");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let sock = listener.sock().expect("accepted socket");
        assert_eq!(sock.config().linger, Some(std::time::Duration::from_secs(2)));
    }

    // ---

    #[test]
    fn steal_leaves_source_empty() {
        // ---
        let p = params(&[("transtype", "file")]);
        let mut a = ConnCommon::configure("127.0.0.1", &p, Role::Target, None).unwrap();
        a.sock = Some(LrtSocket::new());
        let b = ConnCommon::steal_from(&mut a);
        assert!(a.sock.is_none(), "handle moved, not copied");
        assert!(b.sock.is_some());
        assert!(b.bindsock.is_none());
        assert_eq!(b.settings.mode, Mode::Caller);
        assert_eq!(b.settings.transtype.as_deref(), Some("file"));
    }
}
