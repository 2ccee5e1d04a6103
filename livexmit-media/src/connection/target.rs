//! LRT target medium.

use std::io;

// ---

use mio::{Interest, Registry, Token};

// ---

use livexmit_domain::{
    ConnParams, Medium, MediumStats, Result, Role, SockStatus, Target, TransmitConfig,
    UriDescriptor, XmitError,
};
use livexmit_lrt::LrtError;

// ---

use super::ConnCommon;
use crate::net::network_port;

// ---------------------------------------------------------------------------
// LrtTarget
// ---------------------------------------------------------------------------

pub struct LrtTarget {
    // ---
    uri: UriDescriptor,
    common: ConnCommon,
    broken: bool,
}

impl LrtTarget {
    // ---

    pub fn open(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let port = network_port(uri)?;
        let mut common =
            ConnCommon::configure(uri.host(), uri.params(), Role::Target, cfg.payload_override())?;
        common.open(uri.host(), port)?;

        Ok(Self {
            uri: uri.clone(),
            common,
            broken: false,
        })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.common.local_addr()
    }
}

impl Medium for LrtTarget {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.common.is_connected()
    }

    fn status(&mut self) -> Option<SockStatus> {
        Some(self.common.status())
    }

    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<bool> {
        self.common.register(registry, token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.common.deregister(registry)
    }

    fn accept_new_client(&mut self) -> Result<bool> {
        self.common.accept_new_client()
    }

    fn carry_over(&self) -> ConnParams {
        self.common.carry_over()
    }

    fn stats(&self) -> Option<MediumStats> {
        self.common.sock().map(|s| s.stats())
    }

    fn close(&mut self) {
        self.common.close();
    }
}

impl Target for LrtTarget {
    // ---
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        // ---
        let Some(sock) = self.common.sock_mut() else {
            let e = LrtError::NotConnected;
            return Err(XmitError::Transmission {
                step: "send",
                code: e.code(),
                message: e.to_string(),
            });
        };

        match sock.send(chunk) {
            Ok(()) => Ok(()),
            Err(LrtError::ConnectionLost) => {
                self.broken = true;
                Err(XmitError::RemoteClosed(format!("{}: connection lost", self.uri)))
            }
            Err(e) => Err(XmitError::Transmission {
                step: "send",
                code: e.code(),
                message: e.to_string(),
            }),
        }
    }

    fn broken(&self) -> bool {
        self.broken
    }
}
