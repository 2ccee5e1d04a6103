//! LRT source medium.

use std::io;
use std::time::Instant;

// ---

use mio::{Interest, Registry, Token};
use tracing::{debug, info};

// ---

use livexmit_domain::{
    ConnParams, Medium, MediumStats, Result, Role, SockStatus, Source, TransmitConfig,
    UriDescriptor, XmitError,
};
use livexmit_lrt::LrtError;

// ---

use super::ConnCommon;
use crate::net::network_port;

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Periodic bandwidth and statistics lines, counted in reads.
struct Reporter {
    // ---
    bw_every: u64,
    stats_every: u64,
    reads: u64,
    window_bytes: u64,
    window_start: Instant,
}

impl Reporter {
    // ---

    fn new(cfg: &TransmitConfig) -> Self {
        Self {
            bw_every: cfg.bw_report,
            stats_every: cfg.stats_report,
            reads: 0,
            window_bytes: 0,
            window_start: Instant::now(),
        }
    }

    fn on_read(&mut self, len: usize, stats: impl FnOnce() -> MediumStats) {
        // ---
        self.reads += 1;
        self.window_bytes += len as u64;

        if self.bw_every > 0 && self.reads % self.bw_every == 0 {
            let secs = self.window_start.elapsed().as_secs_f64().max(1e-6);
            let mbps = (self.window_bytes * 8) as f64 / secs / 1_000_000.0;
            info!("+++/+++LRT BANDWIDTH: {mbps:.3} Mb/s");
            self.window_bytes = 0;
            self.window_start = Instant::now();
        }

        if self.stats_every > 0 && self.reads % self.stats_every == 0 {
            let s = stats();
            info!(
                msgs_recv = s.msgs_recv,
                bytes_recv = s.bytes_recv,
                msgs_sent = s.msgs_sent,
                bytes_sent = s.bytes_sent,
                send_drops = s.send_drops,
                "LRT source statistics",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// LrtSource
// ---------------------------------------------------------------------------

pub struct LrtSource {
    // ---
    uri: UriDescriptor,
    common: ConnCommon,
    reporter: Reporter,
    eof: bool,
}

impl LrtSource {
    // ---

    pub fn open(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let port = network_port(uri)?;
        let mut common =
            ConnCommon::configure(uri.host(), uri.params(), Role::Source, cfg.payload_override())?;
        common.open(uri.host(), port)?;

        Ok(Self {
            uri: uri.clone(),
            common,
            reporter: Reporter::new(cfg),
            eof: false,
        })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.common.local_addr()
    }
}

impl Medium for LrtSource {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.common.is_connected()
    }

    fn status(&mut self) -> Option<SockStatus> {
        Some(self.common.status())
    }

    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<bool> {
        self.common.register(registry, token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.common.deregister(registry)
    }

    fn accept_new_client(&mut self) -> Result<bool> {
        self.common.accept_new_client()
    }

    fn carry_over(&self) -> ConnParams {
        self.common.carry_over()
    }

    fn stats(&self) -> Option<MediumStats> {
        self.common.sock().map(|s| s.stats())
    }

    fn close(&mut self) {
        self.common.close();
    }
}

impl Source for LrtSource {
    // ---
    fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        // ---
        let Some(sock) = self.common.sock_mut() else {
            return Ok(None);
        };

        let msg = match sock.recv() {
            Ok(msg) => msg,
            Err(LrtError::WouldBlock) | Err(LrtError::NotConnected) => return Ok(None),
            Err(e) => {
                self.eof = true;
                return Err(XmitError::RemoteClosed(format!("{}: {e}", self.uri)));
            }
        };

        let stats = sock.stats();
        self.reporter.on_read(msg.len(), || stats);

        if msg.len() > max {
            debug!(len = msg.len(), max, "message longer than chunk size, truncated");
        }
        Ok(Some(msg[..msg.len().min(max)].to_vec()))
    }

    fn end(&self) -> bool {
        self.eof
    }
}
