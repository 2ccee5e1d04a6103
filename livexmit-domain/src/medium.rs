//! Capability traits shared by every medium kind.
//!
//! A medium is one endpoint of a transfer: a reliable connection, a datagram
//! socket, a file, or the console. The transfer loop only ever talks to the
//! [`Source`] and [`Target`] traits and never inspects concrete types.
//!
//! Media with a pollable native handle register it with a [`mio::Registry`];
//! media without one (files, the console) report `false` from
//! [`Medium::register`] and are treated as always ready.

use std::fmt;
use std::io;

// ---

use mio::{Interest, Registry, Token};

// ---

use crate::{ConnParams, Result, UriDescriptor};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    // ---
    Source,
    Target,
}

impl fmt::Display for Role {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Target => f.write_str("target"),
        }
    }
}

// ---------------------------------------------------------------------------
// SockStatus
// ---------------------------------------------------------------------------

/// Connection state of a connection-oriented working handle.
///
/// `Init → Opened → Connecting → Connected → Broken/Closed` for callers and
/// rendezvous peers; `Opened → Listening` for listeners, which become
/// `Connected` only through an explicit accept. `NonExist` is reported for a
/// handle that was never created or has already been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockStatus {
    // ---
    Init,
    Opened,
    Listening,
    Connecting,
    Connected,
    Broken,
    Closing,
    Closed,
    NonExist,
}

impl SockStatus {
    // ---

    /// True for states from which the handle can no longer carry data.
    pub fn is_gone(self) -> bool {
        matches!(self, Self::Broken | Self::Closing | Self::Closed | Self::NonExist)
    }
}

impl fmt::Display for SockStatus {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Opened => "OPENED",
            Self::Listening => "LISTENING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Broken => "BROKEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::NonExist => "NONEXIST",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// MediumStats
// ---------------------------------------------------------------------------

/// Running counters reported by media that keep them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    // ---
    pub msgs_sent: u64,
    pub msgs_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    /// Messages refused by the send path (payload limit or full buffer).
    pub send_drops: u64,
}

// ---------------------------------------------------------------------------
// Medium
// ---------------------------------------------------------------------------

pub trait Medium: Send {
    // ---

    /// The URI this medium was created from.
    fn uri(&self) -> &UriDescriptor;

    /// True when the medium can currently carry data.
    fn is_open(&self) -> bool;

    /// Connection state of the working handle, or `None` for connectionless
    /// media.
    fn status(&mut self) -> Option<SockStatus> {
        None
    }

    /// Register the native handle for readiness notifications.
    ///
    /// Returns `Ok(false)` when the medium has nothing to register.
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest)
        -> io::Result<bool>;

    /// Remove the native handle from the registry. A no-op for media that
    /// never registered.
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;

    /// Accept one pending peer on a listening medium.
    ///
    /// Returns `Ok(true)` when the medium switched from listening to
    /// connected, `Ok(false)` when no peer was pending. Media that never
    /// listen return `Ok(false)`.
    fn accept_new_client(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Parameters to merge into the URI when this slot is recreated after a
    /// disconnect.
    fn carry_over(&self) -> ConnParams {
        ConnParams::default()
    }

    fn stats(&self) -> Option<MediumStats> {
        None
    }

    /// Release every native handle. Idempotent.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Source / Target
// ---------------------------------------------------------------------------

pub trait Source: Medium {
    // ---

    /// Read at most `max` bytes as one chunk.
    ///
    /// `Ok(None)` means no data is available right now. End of input is an
    /// error ([`XmitError::EndOfStream`] for byte streams,
    /// [`XmitError::RemoteClosed`] for a lost peer), never an empty chunk.
    ///
    /// [`XmitError::EndOfStream`]: crate::XmitError::EndOfStream
    /// [`XmitError::RemoteClosed`]: crate::XmitError::RemoteClosed
    fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>>;

    /// True once the source can produce no more data.
    fn end(&self) -> bool;
}

pub trait Target: Medium {
    // ---

    /// Send one chunk.
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// True once the target can accept no more data.
    fn broken(&self) -> bool;
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn gone_states() {
        // ---
        for s in [
            SockStatus::Broken,
            SockStatus::Closing,
            SockStatus::Closed,
            SockStatus::NonExist,
        ] {
            assert!(s.is_gone(), "{s} should be gone");
        }
        for s in [
            SockStatus::Init,
            SockStatus::Opened,
            SockStatus::Listening,
            SockStatus::Connecting,
            SockStatus::Connected,
        ] {
            assert!(!s.is_gone(), "{s} should not be gone");
        }
    }
}
