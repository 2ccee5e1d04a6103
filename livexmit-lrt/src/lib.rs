//! LRT: a live reliable transport primitive.
//!
//! LRT carries discrete messages over TCP. Each message travels as a 4-byte
//! big-endian length followed by its payload, so message boundaries survive
//! the byte stream. The socket surface is deliberately narrow and
//! socket-like:
//!
//! - create / bind / listen / accept / connect / close
//! - non-blocking `send` and `recv` of whole messages
//! - a status query that also advances pending connects
//! - named PRE and POST options (see [`options`])
//! - readiness registration through [`mio::event::Source`]
//!
//! Three establishment modes are supported: caller (`connect`), listener
//! (`listen` + `accept`) and rendezvous (both peers bind and `connect` to
//! each other).

mod error;
mod frame;
pub mod options;
mod rendezvous;
mod socket;

// --- error
pub use error::{LrtError, Result};

// --- options
pub use options::{
    // ---
    Binding,
    SocketConfig,
    TransType,
    LIVE_DEF_PAYLOAD,
    LIVE_MAX_PAYLOAD,
    MAX_MESSAGE,
};

// --- socket
pub use socket::LrtSocket;
