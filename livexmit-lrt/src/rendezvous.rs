//! Symmetric connection setup.
//!
//! Both peers bind a known local port, listen on it and keep dialling the
//! other side's port, so either side may start first. Every established TCP
//! connection opens with a hello frame carrying a random cookie. The
//! connection dialled by the peer holding the larger cookie is kept on both
//! sides; every other connection is dropped.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

// ---

use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

// ---

use crate::frame::{self, Decoded};
use crate::socket::connect_in_progress;
use crate::{LrtError, SocketConfig};

// ---

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

struct Attempt {
    // ---
    stream: TcpStream,
    rx: BytesMut,
    tx: BytesMut,
    established: bool,
    peer_cookie: Option<u64>,
}

impl Attempt {
    // ---

    fn new(stream: TcpStream, established: bool, cookie: u64) -> Self {
        // ---
        let mut tx = BytesMut::new();
        frame::encode_hello(&mut tx, cookie);
        Self {
            stream,
            rx: BytesMut::new(),
            tx,
            established,
            peer_cookie: None,
        }
    }

    /// Advance the attempt; an error means it is dead.
    fn drive(&mut self) -> io::Result<()> {
        // ---
        if !self.established {
            if let Some(e) = self.stream.take_error()? {
                return Err(e);
            }
            match self.stream.peer_addr() {
                Ok(_) => self.established = true,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        frame::flush(&mut self.stream, &mut self.tx)?;

        if self.peer_cookie.is_none() {
            let eof = frame::fill(&mut self.stream, &mut self.rx, false)?;
            match frame::decode(&mut self.rx) {
                Decoded::Frame(payload) => {
                    let cookie = frame::parse_hello(&payload).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "expected rendezvous hello")
                    })?;
                    self.peer_cookie = Some(cookie);
                }
                Decoded::Oversized(n) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("oversized hello frame ({n} bytes)"),
                    ));
                }
                Decoded::Incomplete if eof => return Err(io::ErrorKind::UnexpectedEof.into()),
                Decoded::Incomplete => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rendezvous
// ---------------------------------------------------------------------------

pub(crate) enum Progress {
    // ---
    Pending,
    /// The kept stream, plus whatever was read or queued past the hello.
    Established {
        stream: TcpStream,
        rx: BytesMut,
        tx: BytesMut,
    },
    Failed(LrtError),
}

pub(crate) struct Rendezvous {
    // ---
    local: SocketAddr,
    peer: SocketAddr,
    cookie: u64,
    peer_cookie: Option<u64>,
    listener: TcpListener,
    outgoing: Option<Attempt>,
    accepted: Vec<Attempt>,
    retry_at: Instant,
    deadline: Instant,
    config: SocketConfig,
}

impl Rendezvous {
    // ---

    /// Turn the bound socket into the rendezvous listener and start dialling.
    pub(crate) fn start(bound: Socket, peer: SocketAddr, config: SocketConfig) -> io::Result<Self> {
        // ---
        bound.listen(8)?;
        let listener = TcpListener::from_std(bound.into());
        let local = listener.local_addr()?;
        let now = Instant::now();

        let mut rdv = Self {
            local,
            peer,
            cookie: rand::random(),
            peer_cookie: None,
            listener,
            outgoing: None,
            accepted: Vec::new(),
            retry_at: now,
            deadline: now + config.connect_timeout,
            config,
        };
        rdv.dial(now);
        debug!(local = %rdv.local, peer = %rdv.peer, "rendezvous started");
        Ok(rdv)
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub(crate) fn listener_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }

    pub(crate) fn poll(&mut self) -> Progress {
        // ---
        let now = Instant::now();
        if now >= self.deadline {
            return Progress::Failed(LrtError::TimedOut);
        }

        self.accept_pending();
        self.dial(now);

        if let Some(att) = self.outgoing.as_mut() {
            if let Err(e) = att.drive() {
                debug!(peer = %self.peer, error = %e, "rendezvous dial failed, will retry");
                self.outgoing = None;
                self.retry_at = now + RETRY_INTERVAL;
            }
        }
        self.accepted.retain_mut(|att| att.drive().is_ok());

        if self.peer_cookie.is_none() {
            self.peer_cookie = self
                .outgoing
                .iter()
                .chain(self.accepted.iter())
                .find_map(|a| a.peer_cookie);
        }

        let Some(peer_cookie) = self.peer_cookie else {
            return Progress::Pending;
        };

        if peer_cookie == self.cookie {
            return Progress::Failed(LrtError::InvalidState("rendezvous cookie collision"));
        }

        let keeper = if self.cookie > peer_cookie {
            let ready = self.outgoing.as_ref().is_some_and(|a| a.peer_cookie.is_some());
            if ready {
                self.outgoing.take()
            } else {
                None
            }
        } else {
            self.accepted
                .iter()
                .position(|a| a.peer_cookie.is_some())
                .map(|i| self.accepted.swap_remove(i))
        };

        match keeper {
            Some(att) => {
                debug!(
                    local = %self.local,
                    peer = %self.peer,
                    dialled = self.cookie > peer_cookie,
                    "rendezvous settled",
                );
                Progress::Established {
                    stream: att.stream,
                    rx: att.rx,
                    tx: att.tx,
                }
            }
            None => Progress::Pending,
        }
    }

    // ---

    fn accept_pending(&mut self) {
        // ---
        loop {
            match self.listener.accept() {
                Ok((stream, from)) => {
                    debug!(%from, "rendezvous accepted");
                    self.accepted.push(Attempt::new(stream, true, self.cookie));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!(error = %e, "rendezvous accept failed");
                    return;
                }
            }
        }
    }

    fn dial(&mut self, now: Instant) {
        // ---
        let lost_contest = matches!(self.peer_cookie, Some(pc) if pc > self.cookie);
        if self.outgoing.is_some() || lost_contest || now < self.retry_at {
            return;
        }
        match self.connect_out() {
            Ok(stream) => self.outgoing = Some(Attempt::new(stream, false, self.cookie)),
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "rendezvous dial setup failed");
                self.retry_at = now + RETRY_INTERVAL;
            }
        }
    }

    fn connect_out(&self) -> io::Result<TcpStream> {
        // ---
        let sock = Socket::new(Domain::for_address(self.peer), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_nonblocking(true)?;
        self.config.apply_pre(&sock, self.peer.is_ipv6())?;
        sock.bind(&SocketAddr::new(self.local.ip(), 0).into())?;
        match sock.connect(&self.peer.into()) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(e),
        }
        Ok(TcpStream::from_std(sock.into()))
    }
}
