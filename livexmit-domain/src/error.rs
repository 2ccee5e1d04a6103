use thiserror::Error;

// ---

use crate::Role;

// ---

#[derive(Debug, Error)]
pub enum XmitError {
    // ---
    /// Bad URI, bad parameter value, or an option combination that cannot
    /// work. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Socket setup failed at the named step (socket, bind, listen, connect,
    /// accept). Recoverable when auto-reconnect is on.
    #[error("error: {step}: {message} (code {code})")]
    Connection {
        step: &'static str,
        code: i32,
        message: String,
    },

    /// Sending or receiving on an established medium failed.
    #[error("transmission error: {step}: {message} (code {code})")]
    Transmission {
        step: &'static str,
        code: i32,
        message: String,
    },

    /// The peer of a connection-oriented medium went away.
    #[error("remote closed: {0}")]
    RemoteClosed(String),

    /// A byte-stream source reached the end of its input.
    #[error("end of stream: {0}")]
    EndOfStream(String),

    #[error("unsupported {role} medium type: {uri}")]
    Unsupported { role: Role, uri: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

impl XmitError {
    // ---

    /// Errors after which the transfer loop may recreate the medium instead
    /// of terminating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RemoteClosed(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

// ---

pub type Result<T> = std::result::Result<T, XmitError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn recoverable_split() {
        // ---
        let conn = XmitError::Connection {
            step: "connect",
            code: 111,
            message: "refused".into(),
        };
        assert!(conn.is_recoverable());
        assert!(XmitError::RemoteClosed("peer gone".into()).is_recoverable());

        assert!(!XmitError::config("bad port").is_recoverable());
        assert!(!XmitError::EndOfStream("stdin".into()).is_recoverable());
        let tx = XmitError::Transmission {
            step: "send",
            code: 5,
            message: "buffer full".into(),
        };
        assert!(!tx.is_recoverable(), "transmission errors are fatal");
    }

    // ---

    #[test]
    fn connection_error_names_step() {
        // ---
        let e = XmitError::Connection {
            step: "bind",
            code: 98,
            message: "address in use".into(),
        };
        let text = e.to_string();
        assert!(text.contains("bind"), "step missing from: {text}");
        assert!(text.contains("address in use"));
    }
}
