//! The transfer loop.
//!
//! One thread owns both media slots, the readiness monitor and the chunk
//! queue. Each iteration:
//!
//! 1. create any empty slot from its URI and register it
//! 2. wait up to the poll timeout for readiness
//! 3. probe connection state: accept on a ready listener, note new
//!    connections, release (or abort on) broken ones
//! 4. read up to `read_ahead` chunks from a ready source
//! 5. write the queue to the target in order, or drop it when no target is
//!    open
//!
//! The loop ends when the interrupt or watchdog flag is set, when a byte
//! stream source runs dry, or when a medium disconnects with auto-reconnect
//! off.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use mio::{Interest, Registry};
use tracing::{debug, info, warn};

// ---

use livexmit_domain::{ConnParams, Medium, Result, Role, SockStatus, Source, Target, XmitError};
use livexmit_media::MediumFactory;

// ---

use crate::meter::TransferSummary;
use crate::monitor::{token_for, Monitor, Readiness};

// ---------------------------------------------------------------------------
// StopFlags
// ---------------------------------------------------------------------------

/// Cooperative stop requests, set from the signal and watchdog tasks and
/// polled once per iteration.
#[derive(Debug, Clone, Default)]
pub struct StopFlags {
    // ---
    interrupt: Arc<AtomicBool>,
    expired: Arc<AtomicBool>,
}

impl StopFlags {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    // ---
    Interrupted,
    TimedOut,
    /// A medium disconnected and auto-reconnect is off.
    Aborted(Role),
    /// A byte-stream source reached the end of its input.
    SourceExhausted,
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

fn interest(role: Role) -> Interest {
    // ---
    match role {
        Role::Source => Interest::READABLE,
        // readable too: state transitions show up as read events
        Role::Target => Interest::READABLE | Interest::WRITABLE,
    }
}

struct Slot<M: ?Sized> {
    // ---
    medium: Option<Box<M>>,
    /// The medium's handle is in the monitor.
    registered: bool,
    connected: bool,
    /// Source only: the last batch filled up, so more data may be waiting
    /// without a new readiness edge.
    pending: bool,
    /// Creation is failing and being retried.
    failing: bool,
    /// Parameters for the next incarnation.
    carry: ConnParams,
}

impl<M: Medium + ?Sized> Slot<M> {
    // ---

    fn empty() -> Self {
        Self {
            medium: None,
            registered: false,
            connected: false,
            pending: false,
            failing: false,
            carry: ConnParams::new(),
        }
    }

    fn install(&mut self, mut medium: Box<M>, registry: &Registry, role: Role) -> io::Result<()> {
        // ---
        self.registered = medium.register(registry, token_for(role), interest(role))?;
        self.medium = Some(medium);
        self.connected = false;
        self.pending = false;
        self.failing = false;
        Ok(())
    }

    /// Deregister, close and drop the medium. Its carry-over parameters are
    /// kept for the next incarnation.
    fn release(&mut self, registry: &Registry) {
        // ---
        if let Some(mut m) = self.medium.take() {
            let carry = m.carry_over();
            if !carry.is_empty() {
                self.carry = carry;
            }
            if self.registered {
                if let Err(e) = m.deregister(registry) {
                    debug!(error = %e, "deregister on release failed");
                }
            }
            m.close();
        }
        self.registered = false;
        self.connected = false;
        self.pending = false;
    }
}

/// Create-or-retry bookkeeping for one slot.
fn fill_slot<M: Medium + ?Sized>(
    slot: &mut Slot<M>,
    created: Result<Option<Box<M>>>,
    role: Role,
    uri: &str,
    registry: &Registry,
    auto_reconnect: bool,
) -> Result<()> {
    // ---
    match created {
        Ok(Some(medium)) => {
            slot.install(medium, registry, role)?;
            debug!(%role, uri, registered = slot.registered, "medium created");
            Ok(())
        }
        Ok(None) => Err(XmitError::Unsupported {
            role,
            uri: uri.to_string(),
        }),
        Err(e) if e.is_recoverable() && auto_reconnect => {
            if slot.failing {
                debug!(%role, error = %e, "medium setup still failing");
            } else {
                warn!(%role, error = %e, "medium setup failed, retrying");
            }
            slot.failing = true;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Inspect a slot's connection state. Returns `true` when the medium is
/// gone and must take the disconnect path.
fn probe<M: Medium + ?Sized>(
    slot: &mut Slot<M>,
    role: Role,
    ready: bool,
    registry: &Registry,
    quiet: bool,
) -> Result<bool> {
    // ---
    let Some(m) = slot.medium.as_mut() else {
        return Ok(false);
    };
    let Some(status) = m.status() else {
        return Ok(false);
    };

    match status {
        SockStatus::Listening if ready => {
            if slot.registered {
                let _ = m.deregister(registry);
                slot.registered = false;
            }
            let accepted = m.accept_new_client();
            slot.registered = m.register(registry, token_for(role), interest(role))?;
            match accepted {
                Ok(true) => debug!(%role, "listener handed over to accepted peer"),
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(%role, error = %e, "accept failed");
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
            Ok(false)
        }
        SockStatus::Connected if !slot.connected => {
            slot.connected = true;
            if !quiet {
                info!(%role, uri = %m.uri(), "connected");
            }
            // The working handle may have changed while connecting.
            if slot.registered {
                let _ = m.deregister(registry);
            }
            slot.registered = m.register(registry, token_for(role), interest(role))?;
            Ok(false)
        }
        s if s.is_gone() => Ok(true),
        _ => Ok(false),
    }
}

// ---------------------------------------------------------------------------
// TransferLoop
// ---------------------------------------------------------------------------

pub struct TransferLoop {
    // ---
    factory: MediumFactory,
    source_uri: String,
    target_uri: String,
    monitor: Monitor,
    source: Slot<dyn Source>,
    target: Slot<dyn Target>,
    queue: VecDeque<Vec<u8>>,
    flags: StopFlags,
    summary: TransferSummary,
}

impl TransferLoop {
    // ---

    pub fn new(
        factory: MediumFactory,
        source_uri: impl Into<String>,
        target_uri: impl Into<String>,
        flags: StopFlags,
    ) -> Result<Self> {
        // ---
        let read_ahead = factory.config().read_ahead;
        Ok(Self {
            factory,
            source_uri: source_uri.into(),
            target_uri: target_uri.into(),
            monitor: Monitor::new()?,
            source: Slot::empty(),
            target: Slot::empty(),
            queue: VecDeque::with_capacity(read_ahead),
            flags,
            summary: TransferSummary::default(),
        })
    }

    pub fn summary(&self) -> &TransferSummary {
        &self.summary
    }

    /// Run until a stop condition. Both media are closed on return.
    pub fn run(&mut self) -> Result<Exit> {
        // ---
        let exit = self.run_until_stopped();
        self.teardown();
        exit
    }

    /// Create whichever slots are empty.
    pub fn open_slots(&mut self) -> Result<()> {
        // ---
        let auto = self.factory.config().auto_reconnect;

        if self.source.medium.is_none() {
            let created = self
                .factory
                .create_source(&self.source_uri, &self.source.carry);
            fill_slot(
                &mut self.source,
                created,
                Role::Source,
                &self.source_uri,
                self.monitor.registry(),
                auto,
            )?;
        }

        if self.target.medium.is_none() {
            let created = self
                .factory
                .create_target(&self.target_uri, &self.target.carry);
            fill_slot(
                &mut self.target,
                created,
                Role::Target,
                &self.target_uri,
                self.monitor.registry(),
                auto,
            )?;
        }
        Ok(())
    }

    // ---

    fn run_until_stopped(&mut self) -> Result<Exit> {
        // ---
        loop {
            if self.flags.is_interrupted() {
                return Ok(Exit::Interrupted);
            }
            if self.flags.is_expired() {
                return Ok(Exit::TimedOut);
            }

            self.open_slots()?;

            let ready = self.monitor.wait(self.wait_time())?;

            if let Some(exit) = self.check_states(ready)? {
                return Ok(exit);
            }

            let read_stop = self.read_batch(ready)?;
            let write_stop = self.drain_queue()?;
            if let Some(exit) = read_stop.or(write_stop) {
                return Ok(exit);
            }
        }
    }

    /// Zero when the source may already hold data, else the poll timeout.
    fn wait_time(&self) -> Duration {
        // ---
        let always_ready = self.source.medium.is_some() && !self.source.registered;
        if self.source.pending || always_ready {
            Duration::ZERO
        } else {
            self.factory.config().poll_timeout
        }
    }

    fn check_states(&mut self, ready: Readiness) -> Result<Option<Exit>> {
        // ---
        let quiet = self.factory.config().quiet;
        let registry = self.monitor.registry();

        let source_gone = probe(
            &mut self.source,
            Role::Source,
            ready.for_role(Role::Source),
            registry,
            quiet,
        )?;
        let target_gone = probe(
            &mut self.target,
            Role::Target,
            ready.for_role(Role::Target),
            registry,
            quiet,
        )?;

        for (role, gone) in [(Role::Source, source_gone), (Role::Target, target_gone)] {
            if gone {
                if let Some(exit) = self.disconnect(role) {
                    return Ok(Some(exit));
                }
            }
        }
        Ok(None)
    }

    /// Log the loss of `role` and release its slot, or stop when
    /// auto-reconnect is off.
    fn disconnect(&mut self, role: Role) -> Option<Exit> {
        // ---
        let cfg = self.factory.config();
        let (quiet, auto) = (cfg.quiet, cfg.auto_reconnect);

        let was_connected = match role {
            Role::Source => self.source.connected,
            Role::Target => self.target.connected,
        };
        if was_connected && !quiet {
            warn!(%role, "disconnected");
        } else if !was_connected {
            debug!(%role, "connection failed before it was established");
        }

        if !auto {
            return Some(Exit::Aborted(role));
        }

        let registry = self.monitor.registry();
        match role {
            Role::Source => self.source.release(registry),
            Role::Target => self.target.release(registry),
        }
        self.summary.reconnects += 1;
        None
    }

    fn read_batch(&mut self, ready: Readiness) -> Result<Option<Exit>> {
        // ---
        let cfg = self.factory.config();
        let (max, batch) = (cfg.chunk_size, cfg.read_ahead);

        let Some(src) = self.source.medium.as_mut() else {
            return Ok(None);
        };
        if !(ready.source || self.source.pending || !self.source.registered) {
            return Ok(None);
        }
        self.source.pending = false;

        let mut exit = None;
        let mut gone = false;
        while self.queue.len() < batch {
            match src.read(max) {
                Ok(Some(chunk)) if !chunk.is_empty() => {
                    self.summary.on_read(chunk.len());
                    self.queue.push_back(chunk);
                }
                Ok(_) => break,
                Err(XmitError::EndOfStream(what)) => {
                    info!(source = %what, "end of input");
                    exit = Some(Exit::SourceExhausted);
                    break;
                }
                Err(e @ XmitError::RemoteClosed(_)) => {
                    debug!(error = %e, "source read failed");
                    gone = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        gone |= exit.is_none() && src.end();
        if self.queue.len() >= batch {
            self.source.pending = true;
        }
        if gone {
            exit = self.disconnect(Role::Source);
        }
        Ok(exit)
    }

    fn drain_queue(&mut self) -> Result<Option<Exit>> {
        // ---
        let mut gone = false;
        while let Some(chunk) = self.queue.pop_front() {
            let open = self.target.medium.as_mut().filter(|t| t.is_open() && !t.broken());
            let Some(tar) = open else {
                self.summary.chunks_dropped += 1;
                continue;
            };
            match tar.write(&chunk) {
                Ok(()) => self.summary.on_written(chunk.len()),
                Err(e @ XmitError::RemoteClosed(_)) => {
                    debug!(error = %e, "target write failed");
                    self.summary.chunks_dropped += 1 + self.queue.len() as u64;
                    self.queue.clear();
                    gone = true;
                }
                Err(e) => return Err(e),
            }
        }
        if gone {
            return Ok(self.disconnect(Role::Target));
        }
        Ok(None)
    }

    fn teardown(&mut self) {
        // ---
        let registry = self.monitor.registry();
        self.source.release(registry);
        self.target.release(registry);
        self.queue.clear();
    }
}
