use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum LrtError {
    // ---
    /// Non-blocking operation found nothing to do.
    #[error("operation would block")]
    WouldBlock,

    #[error("connection lost")]
    ConnectionLost,

    #[error("socket not connected")]
    NotConnected,

    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("send buffer full")]
    SendBufferFull,

    #[error("connect timed out")]
    TimedOut,

    #[error("option '{0}' can only be set before connecting")]
    PreOnly(String),

    #[error("invalid value '{value}' for option '{name}'")]
    InvalidValue { name: String, value: String },

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid socket state: {0}")]
    InvalidState(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

impl LrtError {
    // ---

    /// Numeric code carried into connection and transmission errors.
    ///
    /// OS errors keep their errno; LRT conditions use the 6xxx range.
    pub fn code(&self) -> i32 {
        match self {
            Self::WouldBlock => 6001,
            Self::ConnectionLost => 6002,
            Self::NotConnected => 6003,
            Self::MessageTooLarge { .. } => 6004,
            Self::SendBufferFull => 6005,
            Self::TimedOut => 6006,
            Self::PreOnly(_) => 6010,
            Self::InvalidValue { .. } => 6011,
            Self::UnknownOption(_) => 6012,
            Self::InvalidState(_) => 6013,
            Self::Io(e) => e.raw_os_error().unwrap_or(-1),
        }
    }
}

// ---

pub type Result<T> = std::result::Result<T, LrtError>;
