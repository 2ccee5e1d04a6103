//! Core traits, types, and configuration for the livexmit relay.
//!
//! This crate defines the vocabulary of the system. The media adapters, the
//! transport primitive glue and the transfer loop all depend on
//! `livexmit-domain` and speak its types.
//!
//! # Structure
//!
//! - [`error`]  — [`XmitError`] and [`Result<T>`] alias
//! - [`medium`] — [`Medium`], [`Source`], [`Target`] capability traits
//! - [`uri`]    — [`UriDescriptor`] parsed from `scheme://host:port?k=v`
//! - [`params`] — [`ConnParams`], the consume-as-interpreted option map
//! - [`config`] — [`TransmitConfig`], process-wide transfer settings

mod config;
mod error;
mod medium;
mod params;
mod uri;

// --- error
pub use error::{Result, XmitError};

// --- medium
pub use medium::{
    // ---
    Medium,
    MediumStats,
    Role,
    SockStatus,
    Source,
    Target,
};

// --- uri
pub use uri::UriDescriptor;

// --- params
pub use params::{is_false_name, ConnParams};

// --- config
pub use config::{TransmitConfig, DEFAULT_CHUNK_SIZE, DEFAULT_POLL_TIMEOUT, DEFAULT_READ_AHEAD};
