//! Readiness monitor over the source and target handles.
//!
//! A thin wrapper around [`mio::Poll`] with one token per role. mio is
//! edge-triggered: a readiness event is reported once per change, so the
//! transfer loop keeps its own "still has data" flag for a source whose
//! batch filled up.

use std::io;
use std::time::Duration;

// ---

use mio::{Events, Poll, Registry, Token};

// ---

use livexmit_domain::Role;

// ---

pub const SOURCE: Token = Token(0);
pub const TARGET: Token = Token(1);

const EVENT_CAPACITY: usize = 16;

pub fn token_for(role: Role) -> Token {
    // ---
    match role {
        Role::Source => SOURCE,
        Role::Target => TARGET,
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Which roles saw an event in one wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    // ---
    pub source: bool,
    pub target: bool,
}

impl Readiness {
    // ---
    pub fn for_role(&self, role: Role) -> bool {
        match role {
            Role::Source => self.source,
            Role::Target => self.target,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct Monitor {
    // ---
    poll: Poll,
    events: Events,
}

impl Monitor {
    // ---

    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Wait up to `timeout` for events. An interrupted wait reports nothing.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        // ---
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Readiness::default()),
            Err(e) => return Err(e),
        }

        let mut ready = Readiness::default();
        for event in self.events.iter() {
            match event.token() {
                SOURCE => ready.source = true,
                TARGET => ready.target = true,
                _ => {}
            }
        }
        Ok(ready)
    }
}
