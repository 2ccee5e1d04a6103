//! LRT socket options.
//!
//! Every option has a name (the URI parameter spelling), a binding and a
//! value kind. PRE options shape the connection and are only accepted before
//! `connect`/`listen`; POST options may be changed at any time and are
//! re-applied to an accepted or newly connected stream.

use std::time::Duration;

// ---

use socket2::{SockRef, Socket};

// ---

use crate::{LrtError, Result};

// ---

/// Default live payload: seven 188-byte transport stream packets.
pub const LIVE_DEF_PAYLOAD: usize = 1316;

/// Largest payload accepted in live mode.
pub const LIVE_MAX_PAYLOAD: usize = 1456;

/// Largest message accepted in file mode, and on the receive path.
pub const MAX_MESSAGE: usize = 1 << 20;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Option table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    // ---
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    // ---
    Int,
    Bool,
    TransType,
}

#[derive(Debug)]
pub struct SocketOption {
    // ---
    pub name: &'static str,
    pub binding: Binding,
    kind: Kind,
}

const fn opt(name: &'static str, binding: Binding, kind: Kind) -> SocketOption {
    SocketOption {
        name,
        binding,
        kind,
    }
}

static OPTIONS: &[SocketOption] = &[
    // ---
    opt("transtype", Binding::Pre, Kind::TransType),
    opt("payloadsize", Binding::Pre, Kind::Int),
    opt("tsbpdmode", Binding::Pre, Kind::Bool),
    opt("sndbuf", Binding::Pre, Kind::Int),
    opt("rcvbuf", Binding::Pre, Kind::Int),
    opt("iptos", Binding::Pre, Kind::Int),
    opt("ipttl", Binding::Pre, Kind::Int),
    opt("conntimeo", Binding::Pre, Kind::Int),
    opt("rendezvous", Binding::Pre, Kind::Bool),
    opt("sender", Binding::Pre, Kind::Bool),
    opt("linger", Binding::Post, Kind::Int),
    opt("nodelay", Binding::Post, Kind::Bool),
    opt("sndtimeo", Binding::Post, Kind::Int),
];

pub fn lookup(name: &str) -> Option<&'static SocketOption> {
    OPTIONS.iter().find(|o| o.name == name)
}

/// All option names, in table order.
pub fn option_names() -> impl Iterator<Item = &'static str> {
    OPTIONS.iter().map(|o| o.name)
}

// ---------------------------------------------------------------------------
// SocketConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransType {
    // ---
    /// Message size bounded by the payload size; a full send buffer drops
    /// the message.
    Live,
    /// Large messages; a full send buffer is an error.
    File,
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    // ---
    pub transtype: TransType,
    pub payload_size: usize,
    /// Recorded for peers that ask; LRT delivers messages on arrival.
    pub tsbpd: bool,
    pub sndbuf: Option<usize>,
    pub rcvbuf: Option<usize>,
    pub iptos: Option<u32>,
    pub ipttl: Option<u32>,
    pub connect_timeout: Duration,
    pub rendezvous: bool,
    /// Sender sockets discard inbound payload instead of buffering it.
    pub sender: bool,
    pub linger: Option<Duration>,
    pub nodelay: bool,
    /// How long `send` may wait for a full buffer to drain.
    pub send_wait: Duration,
}

impl Default for SocketConfig {
    // ---
    fn default() -> Self {
        Self {
            transtype: TransType::Live,
            payload_size: LIVE_DEF_PAYLOAD,
            tsbpd: true,
            sndbuf: None,
            rcvbuf: None,
            iptos: None,
            ipttl: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rendezvous: false,
            sender: false,
            linger: None,
            nodelay: true,
            send_wait: Duration::ZERO,
        }
    }
}

impl SocketConfig {
    // ---

    /// Largest message `send` accepts.
    pub fn max_message(&self) -> usize {
        match self.transtype {
            TransType::Live => self.payload_size.min(LIVE_MAX_PAYLOAD),
            TransType::File => MAX_MESSAGE,
        }
    }

    /// Parse `value` for `opt` and record it.
    pub(crate) fn store(&mut self, opt: &SocketOption, value: &str) -> Result<()> {
        // ---
        let invalid = || LrtError::InvalidValue {
            name: opt.name.to_string(),
            value: value.to_string(),
        };

        match opt.kind {
            Kind::TransType => {
                self.transtype = match value {
                    "live" => TransType::Live,
                    "file" => TransType::File,
                    _ => return Err(invalid()),
                };
            }
            Kind::Bool => {
                let flag = parse_bool(value).ok_or_else(invalid)?;
                match opt.name {
                    "tsbpdmode" => self.tsbpd = flag,
                    "rendezvous" => self.rendezvous = flag,
                    "sender" => self.sender = flag,
                    "nodelay" => self.nodelay = flag,
                    _ => return Err(LrtError::UnknownOption(opt.name.into())),
                }
            }
            Kind::Int => {
                let n: u64 = value.trim().parse().map_err(|_| invalid())?;
                match opt.name {
                    "payloadsize" => {
                        if n == 0 || n as usize > MAX_MESSAGE {
                            return Err(invalid());
                        }
                        self.payload_size = n as usize;
                    }
                    "sndbuf" => self.sndbuf = Some(n as usize),
                    "rcvbuf" => self.rcvbuf = Some(n as usize),
                    "iptos" => self.iptos = Some(u32::try_from(n).map_err(|_| invalid())?),
                    "ipttl" => match n {
                        1..=255 => self.ipttl = Some(n as u32),
                        _ => return Err(invalid()),
                    },
                    "conntimeo" => self.connect_timeout = Duration::from_millis(n),
                    "linger" => self.linger = Some(Duration::from_secs(n)),
                    "sndtimeo" => self.send_wait = Duration::from_millis(n),
                    _ => return Err(LrtError::UnknownOption(opt.name.into())),
                }
            }
        }
        Ok(())
    }

    /// Apply the PRE settings that live in the kernel socket.
    pub(crate) fn apply_pre(&self, sock: &Socket, ipv6: bool) -> std::io::Result<()> {
        // ---
        if let Some(n) = self.sndbuf {
            sock.set_send_buffer_size(n)?;
        }
        if let Some(n) = self.rcvbuf {
            sock.set_recv_buffer_size(n)?;
        }
        if ipv6 {
            if let Some(ttl) = self.ipttl {
                sock.set_unicast_hops_v6(ttl)?;
            }
            if self.iptos.is_some() {
                tracing::debug!("iptos ignored on an IPv6 socket");
            }
        } else {
            if let Some(ttl) = self.ipttl {
                sock.set_ttl(ttl)?;
            }
            if let Some(tos) = self.iptos {
                sock.set_tos(tos)?;
            }
        }
        Ok(())
    }

    /// Apply the POST settings to a connected stream.
    pub(crate) fn apply_post(&self, sock: SockRef<'_>) -> std::io::Result<()> {
        // ---
        sock.set_nodelay(self.nodelay)?;
        if self.linger.is_some() {
            sock.set_linger(self.linger)?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    // ---
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" | "true" => Some(true),
        "0" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}
