//! Console media: standard input as a source, standard output as a target.

use std::io::{self, Read, Stdin, Stdout, Write};

// ---

use mio::{Interest, Registry, Token};

// ---

use livexmit_domain::{Medium, Result, Source, Target, TransmitConfig, UriDescriptor, XmitError};

// ---

/// Host names that select the console in a `file://` URI.
pub(crate) fn is_console(uri: &UriDescriptor) -> bool {
    matches!(uri.host(), "con" | "console") && uri.path().is_empty()
}

// ---------------------------------------------------------------------------
// ConsoleSource
// ---------------------------------------------------------------------------

pub struct ConsoleSource {
    // ---
    uri: UriDescriptor,
    stdin: Stdin,
    eof: bool,
}

impl ConsoleSource {
    // ---
    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        Ok(Self {
            uri: uri.clone(),
            stdin: io::stdin(),
            eof: false,
        })
    }
}

impl Medium for ConsoleSource {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        !self.eof
    }

    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<bool> {
        Ok(false)
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.eof = true;
    }
}

impl Source for ConsoleSource {
    // ---

    /// Blocks until standard input has data.
    fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        // ---
        if self.eof {
            return Err(XmitError::EndOfStream("stdin".into()));
        }
        let mut buf = vec![0u8; max];
        let n = self.stdin.lock().read(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Err(XmitError::EndOfStream("stdin".into()));
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    fn end(&self) -> bool {
        self.eof
    }
}

// ---------------------------------------------------------------------------
// ConsoleTarget
// ---------------------------------------------------------------------------

pub struct ConsoleTarget {
    // ---
    uri: UriDescriptor,
    stdout: Stdout,
    closed: bool,
}

impl ConsoleTarget {
    // ---
    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        Ok(Self {
            uri: uri.clone(),
            stdout: io::stdout(),
            closed: false,
        })
    }
}

impl Medium for ConsoleTarget {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<bool> {
        Ok(false)
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stdout.flush();
        self.closed = true;
    }
}

impl Target for ConsoleTarget {
    // ---
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        // ---
        let mut out = self.stdout.lock();
        out.write_all(chunk)
            .and_then(|_| out.flush())
            .map_err(|e| XmitError::Transmission {
                step: "write",
                code: e.raw_os_error().unwrap_or(-1),
                message: e.to_string(),
            })
    }

    fn broken(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn console_host_names() {
        // ---
        for s in ["file://con", "file://console"] {
            assert!(is_console(&UriDescriptor::parse(s).unwrap()), "{s}");
        }
        for s in ["file:///tmp/con", "file://con/x", "/dev/stdout"] {
            assert!(!is_console(&UriDescriptor::parse(s).unwrap()), "{s}");
        }
    }
}
