//! Medium factory: URI scheme → source/target constructors.
//!
//! The registry is built at runtime. `lrt` and `udp` are always present;
//! `file` (files and the console) only when the configuration enables it.
//! An unknown scheme yields `Ok(None)` so the caller decides how to report
//! it.

use std::collections::HashMap;

// ---

use tracing::debug;

// ---

use livexmit_domain::{ConnParams, Result, Source, Target, TransmitConfig, UriDescriptor, XmitError};

// ---

use crate::console::{is_console, ConsoleSource, ConsoleTarget};
use crate::{FileSource, FileTarget, LrtSource, LrtTarget, UdpSource, UdpTarget};

// ---

pub type SourceCtor = fn(&UriDescriptor, &TransmitConfig) -> Result<Box<dyn Source>>;
pub type TargetCtor = fn(&UriDescriptor, &TransmitConfig) -> Result<Box<dyn Target>>;

// ---------------------------------------------------------------------------
// Built-in constructors
// ---------------------------------------------------------------------------

fn lrt_source(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Source>> {
    Ok(Box::new(LrtSource::open(uri, cfg)?))
}

fn lrt_target(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Target>> {
    Ok(Box::new(LrtTarget::open(uri, cfg)?))
}

fn udp_source(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Source>> {
    Ok(Box::new(UdpSource::open(uri, cfg)?))
}

fn udp_target(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Target>> {
    Ok(Box::new(UdpTarget::open(uri, cfg)?))
}

fn file_source(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Source>> {
    // ---
    if is_console(uri) {
        return Ok(Box::new(ConsoleSource::open(uri, cfg)?));
    }
    Ok(Box::new(FileSource::open(uri, cfg)?))
}

fn file_target(uri: &UriDescriptor, cfg: &TransmitConfig) -> Result<Box<dyn Target>> {
    // ---
    if is_console(uri) {
        if cfg.verbose || cfg.bw_report > 0 {
            return Err(XmitError::config(
                "console output cannot be combined with verbose output or bandwidth reports",
            ));
        }
        return Ok(Box::new(ConsoleTarget::open(uri, cfg)?));
    }
    Ok(Box::new(FileTarget::open(uri, cfg)?))
}

// ---------------------------------------------------------------------------
// MediumFactory
// ---------------------------------------------------------------------------

pub struct MediumFactory {
    // ---
    registry: HashMap<String, (SourceCtor, TargetCtor)>,
    config: TransmitConfig,
}

impl MediumFactory {
    // ---

    pub fn new(config: TransmitConfig) -> Self {
        // ---
        let mut factory = Self {
            registry: HashMap::new(),
            config,
        };
        factory.register("lrt", lrt_source, lrt_target);
        factory.register("udp", udp_source, udp_target);
        if factory.config.allow_file_media {
            factory.register("file", file_source, file_target);
        }
        factory
    }

    /// Add or replace the constructors for `scheme`.
    pub fn register(&mut self, scheme: &str, source: SourceCtor, target: TargetCtor) {
        self.registry
            .insert(scheme.to_ascii_lowercase(), (source, target));
    }

    pub fn config(&self) -> &TransmitConfig {
        &self.config
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }

    /// Build a source, merging `carry` over the URI's parameters.
    pub fn create_source(&self, uri: &str, carry: &ConnParams) -> Result<Option<Box<dyn Source>>> {
        // ---
        let Some((desc, (ctor, _))) = self.lookup(uri, carry)? else {
            return Ok(None);
        };
        ctor(&desc, &self.config).map(Some)
    }

    /// Build a target, merging `carry` over the URI's parameters.
    pub fn create_target(&self, uri: &str, carry: &ConnParams) -> Result<Option<Box<dyn Target>>> {
        // ---
        let Some((desc, (_, ctor))) = self.lookup(uri, carry)? else {
            return Ok(None);
        };
        ctor(&desc, &self.config).map(Some)
    }

    fn lookup(
        &self,
        uri: &str,
        carry: &ConnParams,
    ) -> Result<Option<(UriDescriptor, (SourceCtor, TargetCtor))>> {
        // ---
        let mut desc = UriDescriptor::parse(uri)?;
        let Some(ctors) = self.registry.get(desc.scheme()).copied() else {
            debug!(scheme = desc.scheme(), "no medium registered for scheme");
            return Ok(None);
        };
        if !carry.is_empty() {
            desc.merge_params(carry);
        }
        Ok(Some((desc, ctors)))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    fn factory(allow_file_media: bool) -> MediumFactory {
        MediumFactory::new(TransmitConfig {
            allow_file_media,
            ..TransmitConfig::default()
        })
    }

    // ---

    #[test]
    fn unknown_scheme_is_none() {
        // ---
        let f = factory(false);
        assert!(f.create_source("srt://:9000", &ConnParams::new()).unwrap().is_none());
        assert!(f.create_target("rtmp://host:1935", &ConnParams::new()).unwrap().is_none());
    }

    // ---

    #[test]
    fn file_scheme_off_by_default() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}/out.ts", dir.path().display());

        assert!(factory(false).create_target(&uri, &ConnParams::new()).unwrap().is_none());
        let tar = factory(true).create_target(&uri, &ConnParams::new()).unwrap();
        assert!(tar.is_some_and(|t| t.is_open()));
    }

    // ---

    #[test]
    fn low_ports_rejected() {
        // ---
        let f = factory(false);
        for uri in ["udp://127.0.0.1:1024", "lrt://127.0.0.1:443", "lrt://127.0.0.1"] {
            let err = f.create_target(uri, &ConnParams::new()).err();
            assert!(
                matches!(err, Some(XmitError::Configuration(_))),
                "{uri} should be a configuration error, got {err:?}"
            );
        }
    }

    // ---

    #[test]
    fn console_target_conflicts_with_verbose() {
        // ---
        let f = MediumFactory::new(TransmitConfig {
            allow_file_media: true,
            verbose: true,
            ..TransmitConfig::default()
        });
        let err = f.create_target("file://con", &ConnParams::new()).err();
        assert!(matches!(err, Some(XmitError::Configuration(_))), "got {err:?}");
    }

    // ---

    #[test]
    fn carry_over_reaches_the_medium() {
        // ---
        let f = factory(false);
        let listener = f
            .create_source("lrt://127.0.0.1:0?mode=listener", &ConnParams::new())
            .err();
        assert!(listener.is_some(), "port 0 is below the allowed range");

        let mut carry = ConnParams::new();
        carry.insert("ttl", "3");
        let tar = f
            .create_target("udp://127.0.0.1:45123", &carry)
            .unwrap()
            .expect("udp is registered");
        assert_eq!(tar.uri().params().get("ttl"), Some("3"));
        assert_eq!(tar.uri().to_string(), "udp://127.0.0.1:45123", "display keeps the raw text");
    }

    // ---

    #[test]
    fn rendezvous_pair_through_factory() {
        // ---
        use std::time::{Duration, Instant};

        let free = || std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let (a, b) = (free(), free());
        let f = factory(false);

        let mut src = f
            .create_source(&format!("lrt://127.0.0.1:{b}?mode=rendezvous&port={a}"), &ConnParams::new())
            .unwrap()
            .expect("lrt source");
        let mut tar = f
            .create_target(&format!("lrt://127.0.0.1:{a}?mode=rendezvous&port={b}"), &ConnParams::new())
            .unwrap()
            .expect("lrt target");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(src.is_open() && tar.is_open()) {
            assert!(Instant::now() < deadline, "rendezvous never completed");
            src.status();
            tar.status();
            std::thread::sleep(Duration::from_millis(5));
        }

        tar.write(b"both ends dialled").unwrap();
        let got = loop {
            src.status();
            if let Some(chunk) = src.read(1316).unwrap() {
                break chunk;
            }
            assert!(Instant::now() < deadline, "message never arrived");
            std::thread::sleep(Duration::from_millis(2));
        };
        assert_eq!(got, b"both ends dialled".to_vec());
    }
}
