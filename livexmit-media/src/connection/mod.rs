//! Connection-oriented media over the LRT primitive.
//!
//! [`ConnCommon`] owns the socket(s) and the establishment logic shared by
//! [`LrtSource`] and [`LrtTarget`]: parameter interpretation, caller /
//! listener / rendezvous setup, PRE and POST option application, and the
//! one-shot accept that turns a listener into a connected medium.

mod common;
mod source;
mod target;

// ---

use std::fmt;

// ---

use livexmit_domain::XmitError;
use livexmit_lrt::LrtError;

// ---

pub(crate) use common::ConnCommon;
pub use source::LrtSource;
pub use target::LrtTarget;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    // ---
    Caller,
    Listener,
    Rendezvous,
}

impl fmt::Display for Mode {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Caller => f.write_str("caller"),
            Mode::Listener => f.write_str("listener"),
            Mode::Rendezvous => f.write_str("rendezvous"),
        }
    }
}

// ---

/// Wrap an LRT failure during setup, tagged with the step that failed.
pub(crate) fn conn_err(step: &'static str, e: LrtError) -> XmitError {
    XmitError::Connection {
        step,
        code: e.code(),
        message: e.to_string(),
    }
}
