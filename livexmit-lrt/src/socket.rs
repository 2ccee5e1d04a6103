//! [`LrtSocket`]: one LRT endpoint.
//!
//! A socket starts in `Init`, becomes `Opened` once bound, then either
//! `Listening` (after `listen`) or `Connecting` (after `connect`). All I/O is
//! non-blocking. Connection progress, inbound bytes and outbound flushing are
//! driven by [`LrtSocket::status`], [`LrtSocket::recv`] and
//! [`LrtSocket::send`]; callers register the socket with a [`mio::Registry`]
//! to learn when to call them.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

// ---

use bytes::{Bytes, BytesMut};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, warn};

// ---

use livexmit_domain::{MediumStats, SockStatus};

// ---

use crate::frame::{self, Decoded, HEADER_LEN};
use crate::options::{self, Binding, TransType};
use crate::rendezvous::{Progress, Rendezvous};
use crate::{LrtError, Result, SocketConfig};

// ---

/// Cap on queued outbound bytes per socket.
const TX_LIMIT: usize = 4 << 20;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// True when a non-blocking `connect` reported that it is still underway.
pub(crate) fn connect_in_progress(e: &io::Error) -> bool {
    // ---
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Handle {
    // ---
    None,
    /// Created (and possibly bound), not yet listening or connecting.
    Fresh(Socket),
    Listener(TcpListener),
    Stream(TcpStream),
    Rendezvous(Box<Rendezvous>),
}

// ---------------------------------------------------------------------------
// LrtSocket
// ---------------------------------------------------------------------------

pub struct LrtSocket {
    // ---
    id: u32,
    status: SockStatus,
    handle: Handle,
    config: SocketConfig,
    ipv6: bool,
    rx: BytesMut,
    tx: BytesMut,
    peer_closed: bool,
    connect_started: Option<Instant>,
    stats: MediumStats,
}

impl Default for LrtSocket {
    // ---
    fn default() -> Self {
        Self::new()
    }
}

impl LrtSocket {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            status: SockStatus::Init,
            handle: Handle::None,
            config: SocketConfig::default(),
            ipv6: false,
            rx: BytesMut::new(),
            tx: BytesMut::new(),
            peer_closed: false,
            connect_started: None,
            stats: MediumStats::default(),
        }
    }

    /// Process-unique socket id, for logs.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn stats(&self) -> MediumStats {
        self.stats
    }

    /// Last known state, without probing.
    pub fn state(&self) -> SockStatus {
        self.status
    }

    /// Current state, after advancing any pending connect and pumping the
    /// stream.
    ///
    /// A connected socket whose peer has closed still reports `Connected`
    /// until every complete message it delivered has been received.
    pub fn status(&mut self) -> SockStatus {
        // ---
        match self.status {
            SockStatus::Connecting => self.probe_connecting(),
            SockStatus::Connected => {
                self.pump();
                if self.peer_closed && !frame::has_frame(&self.rx) {
                    debug!(id = self.id, "peer closed");
                    self.status = SockStatus::Broken;
                }
            }
            _ => {}
        }
        self.status
    }

    /// Set a named option from the LRT option table.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        // ---
        let opt = options::lookup(name).ok_or_else(|| LrtError::UnknownOption(name.into()))?;

        if opt.binding == Binding::Pre
            && !matches!(self.status, SockStatus::Init | SockStatus::Opened)
        {
            return Err(LrtError::PreOnly(name.into()));
        }

        self.config.store(opt, value)?;

        match (&self.handle, opt.binding) {
            (Handle::Fresh(sock), Binding::Pre) => self.config.apply_pre(sock, self.ipv6)?,
            (Handle::Stream(stream), Binding::Post) => {
                self.config.apply_post(SockRef::from(stream))?
            }
            _ => {}
        }
        Ok(())
    }

    pub fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        // ---
        if self.status != SockStatus::Init {
            return Err(LrtError::InvalidState("bind on a socket that is not fresh"));
        }
        let sock = self.ensure_socket(addr)?;
        sock.bind(&addr.into())?;
        self.status = SockStatus::Opened;
        debug!(id = self.id, %addr, "bound");
        Ok(())
    }

    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        // ---
        if self.status != SockStatus::Opened {
            return Err(LrtError::InvalidState("listen requires a bound socket"));
        }
        let Handle::Fresh(sock) = mem::replace(&mut self.handle, Handle::None) else {
            return Err(LrtError::InvalidState("listen requires a bound socket"));
        };
        if let Err(e) = sock.listen(backlog) {
            self.handle = Handle::Fresh(sock);
            return Err(e.into());
        }
        self.handle = Handle::Listener(TcpListener::from_std(sock.into()));
        self.status = SockStatus::Listening;
        Ok(())
    }

    /// Accept one pending peer.
    ///
    /// The returned socket is `Connected` and inherits this socket's
    /// options. [`LrtError::WouldBlock`] means no peer is waiting.
    pub fn accept(&mut self) -> Result<(LrtSocket, SocketAddr)> {
        // ---
        let Handle::Listener(listener) = &self.handle else {
            return Err(LrtError::InvalidState("accept on a non-listening socket"));
        };
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(LrtError::WouldBlock),
            Err(e) => return Err(e.into()),
        };

        self.config.apply_post(SockRef::from(&stream))?;

        let mut child = LrtSocket::new();
        child.config = self.config.clone();
        child.ipv6 = peer.is_ipv6();
        child.handle = Handle::Stream(stream);
        child.status = SockStatus::Connected;
        debug!(id = self.id, child = child.id, %peer, "accepted");
        Ok((child, peer))
    }

    /// Start connecting to `addr`.
    ///
    /// Returns once the attempt is underway; [`LrtSocket::status`] reports
    /// `Connected` or `Broken` when it resolves. In rendezvous mode the socket
    /// must already be bound to the port the peer dials.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        // ---
        if !matches!(self.status, SockStatus::Init | SockStatus::Opened) {
            return Err(LrtError::InvalidState("connect on a socket already in use"));
        }

        if self.config.rendezvous {
            if self.status != SockStatus::Opened {
                return Err(LrtError::InvalidState("rendezvous requires a bound socket"));
            }
            let Handle::Fresh(sock) = mem::replace(&mut self.handle, Handle::None) else {
                return Err(LrtError::InvalidState("rendezvous requires a bound socket"));
            };
            let rdv = Rendezvous::start(sock, addr, self.config.clone())?;
            self.handle = Handle::Rendezvous(Box::new(rdv));
            self.status = SockStatus::Connecting;
            return Ok(());
        }

        self.ensure_socket(addr)?;
        let Handle::Fresh(sock) = mem::replace(&mut self.handle, Handle::None) else {
            return Err(LrtError::InvalidState("connect without a socket"));
        };
        let done = match sock.connect(&addr.into()) {
            Ok(()) => true,
            Err(e) if connect_in_progress(&e) => false,
            Err(e) => {
                self.handle = Handle::Fresh(sock);
                return Err(e.into());
            }
        };

        self.handle = Handle::Stream(TcpStream::from_std(sock.into()));
        self.connect_started = Some(Instant::now());
        self.status = SockStatus::Connecting;
        debug!(id = self.id, %addr, "connecting");
        if done {
            self.on_connected();
        }
        Ok(())
    }

    /// Queue one message.
    ///
    /// In live mode a message that finds the send buffer full after
    /// `sndtimeo` is dropped and counted; in file mode it is an error.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        // ---
        match self.status {
            SockStatus::Connected => {}
            SockStatus::Broken => return Err(LrtError::ConnectionLost),
            _ => return Err(LrtError::NotConnected),
        }

        let limit = self.config.max_message();
        if payload.len() > limit {
            return Err(LrtError::MessageTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let need = HEADER_LEN + payload.len();
        if !self.wait_for_room(need)? {
            self.stats.send_drops += 1;
            return match self.config.transtype {
                TransType::Live => {
                    debug!(id = self.id, size = payload.len(), "send buffer full, message dropped");
                    Ok(())
                }
                TransType::File => Err(LrtError::SendBufferFull),
            };
        }

        frame::encode(&mut self.tx, payload);
        self.stats.msgs_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;
        self.flush_tx()
    }

    /// Take the next complete message.
    ///
    /// [`LrtError::WouldBlock`] means none has arrived yet;
    /// [`LrtError::ConnectionLost`] means none ever will.
    pub fn recv(&mut self) -> Result<Bytes> {
        // ---
        match self.status {
            SockStatus::Connected => {}
            SockStatus::Broken | SockStatus::Closed if frame::has_frame(&self.rx) => {}
            SockStatus::Broken | SockStatus::Closed => return Err(LrtError::ConnectionLost),
            _ => return Err(LrtError::NotConnected),
        }

        if !frame::has_frame(&self.rx) {
            self.pump();
        }

        match frame::decode(&mut self.rx) {
            Decoded::Frame(payload) => {
                self.stats.msgs_recv += 1;
                self.stats.bytes_recv += payload.len() as u64;
                Ok(payload)
            }
            Decoded::Oversized(len) => {
                warn!(id = self.id, len, "peer announced an oversized message");
                self.peer_closed = true;
                self.status = SockStatus::Broken;
                Err(LrtError::ConnectionLost)
            }
            Decoded::Incomplete if self.peer_closed => {
                self.status = SockStatus::Broken;
                Err(LrtError::ConnectionLost)
            }
            Decoded::Incomplete => Err(LrtError::WouldBlock),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        // ---
        match &self.handle {
            Handle::None => None,
            Handle::Fresh(sock) => sock.local_addr().ok().and_then(|a| a.as_socket()),
            Handle::Listener(l) => l.local_addr().ok(),
            Handle::Stream(s) => s.local_addr().ok(),
            Handle::Rendezvous(r) => Some(r.local_addr()),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        // ---
        match &self.handle {
            Handle::Stream(s) => s.peer_addr().ok(),
            _ => None,
        }
    }

    /// Release the native handle. Queued output gets one last flush.
    /// Idempotent.
    pub fn close(&mut self) {
        // ---
        if let Handle::Stream(stream) = &mut self.handle {
            let _ = frame::flush(stream, &mut self.tx);
        }
        if !matches!(self.handle, Handle::None) {
            debug!(id = self.id, "closed");
        }
        self.handle = Handle::None;
        self.rx.clear();
        self.tx.clear();
        self.status = SockStatus::Closed;
    }

    // ---

    fn ensure_socket(&mut self, addr: SocketAddr) -> Result<&Socket> {
        // ---
        if matches!(self.handle, Handle::None) {
            let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            sock.set_nonblocking(true)?;
            sock.set_reuse_address(true)?;
            self.ipv6 = addr.is_ipv6();
            self.config.apply_pre(&sock, self.ipv6)?;
            self.handle = Handle::Fresh(sock);
        }
        match &self.handle {
            Handle::Fresh(sock) => Ok(sock),
            _ => Err(LrtError::InvalidState("socket already in use")),
        }
    }

    fn probe_connecting(&mut self) {
        // ---
        enum Outcome {
            Pending,
            Connected,
            Failed(String),
        }

        let outcome = match &mut self.handle {
            Handle::Stream(stream) => match stream.take_error() {
                Ok(Some(e)) | Err(e) => Outcome::Failed(e.to_string()),
                Ok(None) => match stream.peer_addr() {
                    Ok(_) => Outcome::Connected,
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                        let expired = self
                            .connect_started
                            .is_some_and(|t| t.elapsed() >= self.config.connect_timeout);
                        if expired {
                            Outcome::Failed(LrtError::TimedOut.to_string())
                        } else {
                            Outcome::Pending
                        }
                    }
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            },
            Handle::Rendezvous(rdv) => match rdv.poll() {
                Progress::Pending => Outcome::Pending,
                Progress::Established { stream, rx, tx } => {
                    self.handle = Handle::Stream(stream);
                    self.rx = rx;
                    self.tx = tx;
                    Outcome::Connected
                }
                Progress::Failed(e) => Outcome::Failed(e.to_string()),
            },
            _ => Outcome::Failed("no handle".into()),
        };

        match outcome {
            Outcome::Pending => {}
            Outcome::Connected => self.on_connected(),
            Outcome::Failed(reason) => {
                debug!(id = self.id, %reason, "connect failed");
                self.status = SockStatus::Broken;
            }
        }
    }

    fn on_connected(&mut self) {
        // ---
        if let Handle::Stream(stream) = &self.handle {
            if let Err(e) = self.config.apply_post(SockRef::from(stream)) {
                warn!(id = self.id, error = %e, "post-connect options failed");
            }
        }
        self.status = SockStatus::Connected;
        debug!(id = self.id, peer = ?self.peer_addr(), "connected");
    }

    /// Flush queued output and pull in whatever the kernel holds.
    fn pump(&mut self) {
        // ---
        let Handle::Stream(stream) = &mut self.handle else {
            return;
        };
        if let Err(e) = frame::flush(stream, &mut self.tx) {
            debug!(id = self.id, error = %e, "write side failed");
            self.peer_closed = true;
            return;
        }
        if self.peer_closed {
            return;
        }
        match frame::fill(stream, &mut self.rx, self.config.sender) {
            Ok(false) => {}
            Ok(true) => self.peer_closed = true,
            Err(e) => {
                debug!(id = self.id, error = %e, "read side failed");
                self.peer_closed = true;
            }
        }
    }

    fn flush_tx(&mut self) -> Result<()> {
        // ---
        let Handle::Stream(stream) = &mut self.handle else {
            return Err(LrtError::NotConnected);
        };
        if let Err(e) = frame::flush(stream, &mut self.tx) {
            debug!(id = self.id, error = %e, "send failed");
            self.peer_closed = true;
            self.status = SockStatus::Broken;
            return Err(LrtError::ConnectionLost);
        }
        Ok(())
    }

    /// Make room for `need` more queued bytes, waiting up to `sndtimeo`.
    fn wait_for_room(&mut self, need: usize) -> Result<bool> {
        // ---
        let deadline = Instant::now() + self.config.send_wait;
        loop {
            self.flush_tx()?;
            if self.tx.len() + need <= TX_LIMIT {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for LrtSocket {
    // ---
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// mio registration
// ---------------------------------------------------------------------------

fn no_handle() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket has no pollable handle")
}

impl Source for LrtSocket {
    // ---
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match &mut self.handle {
            Handle::Listener(l) => l.register(registry, token, interests),
            Handle::Stream(s) => s.register(registry, token, interests),
            Handle::Rendezvous(r) => r.listener_mut().register(registry, token, interests),
            Handle::None | Handle::Fresh(_) => Err(no_handle()),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match &mut self.handle {
            Handle::Listener(l) => l.reregister(registry, token, interests),
            Handle::Stream(s) => s.reregister(registry, token, interests),
            Handle::Rendezvous(r) => r.listener_mut().reregister(registry, token, interests),
            Handle::None | Handle::Fresh(_) => Err(no_handle()),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match &mut self.handle {
            Handle::Listener(l) => l.deregister(registry),
            Handle::Stream(s) => s.deregister(registry),
            Handle::Rendezvous(r) => r.listener_mut().deregister(registry),
            Handle::None | Handle::Fresh(_) => Err(no_handle()),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::LIVE_MAX_PAYLOAD;

    // ---

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        // ---
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Listener plus a caller, both connected. Returns (listener, caller, accepted).
    fn connected_pair() -> (LrtSocket, LrtSocket, LrtSocket) {
        // ---
        let mut listener = LrtSocket::new();
        listener.bind(loopback()).unwrap();
        listener.listen(5).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut caller = LrtSocket::new();
        caller.connect(addr).unwrap();

        let mut accepted = None;
        let ok = wait_for(|| {
            if accepted.is_none() {
                if let Ok((s, _)) = listener.accept() {
                    accepted = Some(s);
                }
            }
            caller.status() == SockStatus::Connected && accepted.is_some()
        });
        assert!(ok, "caller and listener should connect over loopback");
        (listener, caller, accepted.unwrap())
    }

    fn recv_blocking(sock: &mut LrtSocket) -> Result<Bytes> {
        // ---
        let mut out = None;
        wait_for(|| match sock.recv() {
            Err(LrtError::WouldBlock) => false,
            other => {
                out = Some(other);
                true
            }
        });
        out.unwrap_or(Err(LrtError::WouldBlock))
    }

    // ---

    #[test]
    fn state_walk() {
        // ---
        let mut s = LrtSocket::new();
        assert_eq!(s.status(), SockStatus::Init);
        s.bind(loopback()).unwrap();
        assert_eq!(s.status(), SockStatus::Opened);
        s.listen(5).unwrap();
        assert_eq!(s.status(), SockStatus::Listening);
        assert!(matches!(s.accept(), Err(LrtError::WouldBlock)));
        s.close();
        assert_eq!(s.status(), SockStatus::Closed);
        s.close();
        assert_eq!(s.status(), SockStatus::Closed, "close is idempotent");
    }

    // ---

    #[test]
    fn messages_keep_boundaries() {
        // ---
        let (_listener, mut caller, mut accepted) = connected_pair();

        for msg in [&b"alpha"[..], b"be", &[7u8; 1316][..]] {
            caller.send(msg).unwrap();
        }
        assert_eq!(recv_blocking(&mut accepted).unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(recv_blocking(&mut accepted).unwrap(), Bytes::from_static(b"be"));
        assert_eq!(recv_blocking(&mut accepted).unwrap().len(), 1316);
        assert_eq!(caller.stats().msgs_sent, 3);
        assert_eq!(accepted.stats().msgs_recv, 3);
    }

    // ---

    #[test]
    fn pre_options_locked_after_connect() {
        // ---
        let (_listener, mut caller, _accepted) = connected_pair();
        assert!(matches!(
            caller.set_option("payloadsize", "1000"),
            Err(LrtError::PreOnly(_))
        ));
        caller.set_option("linger", "1").expect("post option accepted when connected");
        assert!(matches!(
            caller.set_option("latency", "120"),
            Err(LrtError::UnknownOption(_))
        ));
    }

    // ---

    #[test]
    fn live_payload_limit() {
        // ---
        let (_listener, mut caller, _accepted) = connected_pair();
        let err = caller.send(&vec![0u8; LIVE_MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, LrtError::MessageTooLarge { .. }), "got {err:?}");
    }

    // ---

    #[test]
    fn accepted_inherits_options() {
        // ---
        let mut listener = LrtSocket::new();
        listener.set_option("payloadsize", "500").unwrap();
        listener.bind(loopback()).unwrap();
        listener.listen(5).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut caller = LrtSocket::new();
        caller.connect(addr).unwrap();

        let mut accepted = None;
        assert!(wait_for(|| {
            if let Ok((s, _)) = listener.accept() {
                accepted = Some(s);
            }
            accepted.is_some()
        }));
        assert_eq!(accepted.unwrap().config().max_message(), 500);
    }

    // ---

    #[test]
    fn peer_close_drains_then_breaks() {
        // ---
        let (_listener, mut caller, mut accepted) = connected_pair();
        caller.send(b"last words").unwrap();
        caller.close();

        assert_eq!(
            recv_blocking(&mut accepted).unwrap(),
            Bytes::from_static(b"last words"),
            "buffered message delivered before the break"
        );
        assert!(matches!(recv_blocking(&mut accepted), Err(LrtError::ConnectionLost)));
        assert_eq!(accepted.status(), SockStatus::Broken);
        assert!(matches!(accepted.send(b"x"), Err(LrtError::ConnectionLost)));
    }

    // ---

    #[test]
    fn refused_connect_breaks() {
        // ---
        let addr = {
            let mut probe = LrtSocket::new();
            probe.bind(loopback()).unwrap();
            probe.local_addr().unwrap()
        };

        let mut caller = LrtSocket::new();
        caller.connect(addr).unwrap();
        assert!(
            wait_for(|| caller.status() == SockStatus::Broken),
            "connect to a closed port must end Broken"
        );
    }

    // ---

    #[test]
    fn rendezvous_pair_connects() {
        // ---
        let mut a = LrtSocket::new();
        let mut b = LrtSocket::new();
        for s in [&mut a, &mut b] {
            s.set_option("rendezvous", "1").unwrap();
            s.bind(loopback()).unwrap();
        }
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        a.connect(b_addr).unwrap();
        b.connect(a_addr).unwrap();

        assert!(
            wait_for(|| {
                let sa = a.status();
                let sb = b.status();
                sa == SockStatus::Connected && sb == SockStatus::Connected
            }),
            "both rendezvous peers should connect"
        );

        a.send(b"from a").unwrap();
        b.send(b"from b").unwrap();
        assert_eq!(recv_blocking(&mut b).unwrap(), Bytes::from_static(b"from a"));
        assert_eq!(recv_blocking(&mut a).unwrap(), Bytes::from_static(b"from b"));
    }

    // ---

    #[test]
    fn rendezvous_needs_bind() {
        // ---
        let mut s = LrtSocket::new();
        s.set_option("rendezvous", "yes").unwrap();
        let err = s.connect("127.0.0.1:9".parse().unwrap()).unwrap_err();
        assert!(matches!(err, LrtError::InvalidState(_)), "got {err:?}");
    }
}
