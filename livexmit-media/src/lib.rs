//! Source and target media for livexmit, and the factory that builds them.
//!
//! # Media
//!
//! | scheme | source          | target          | notes                          |
//! |--------|-----------------|-----------------|--------------------------------|
//! | `lrt`  | [`LrtSource`]   | [`LrtTarget`]   | caller / listener / rendezvous |
//! | `udp`  | [`UdpSource`]   | [`UdpTarget`]   | unicast or multicast           |
//! | `file` | [`FileSource`], [`ConsoleSource`] | [`FileTarget`], [`ConsoleTarget`] | only when enabled |
//!
//! Every medium implements [`livexmit_domain::Source`] or
//! [`livexmit_domain::Target`]; callers normally go through
//! [`MediumFactory`] and never name the concrete types.

mod connection;
mod console;
mod datagram;
mod factory;
mod file;
mod net;

// --- connection
pub use connection::{LrtSource, LrtTarget, Mode};

// --- datagram
pub use datagram::{UdpSource, UdpTarget};

// --- byte streams
pub use console::{ConsoleSource, ConsoleTarget};
pub use file::{FileSource, FileTarget};

// --- factory
pub use factory::{MediumFactory, SourceCtor, TargetCtor};
