//! Medium URI parsing.
//!
//! Accepted forms:
//!
//! ```text
//! lrt://host:port?mode=listener&latency=120
//! udp://:5000?ttl=4                 empty host
//! udp://[::1]:5000                  bracketed IPv6 host
//! file://con                        console
//! file:///var/tmp/capture.ts        file path
//! /var/tmp/capture.ts               bare path, same as file://
//! ```
//!
//! General-purpose URL parsers reject the empty-host-with-port form, which is
//! the conventional way to say "listen on every interface" here, so this is a
//! small dedicated parser.

use std::fmt;

// ---

use crate::{ConnParams, Result, XmitError};

// ---------------------------------------------------------------------------
// UriDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriDescriptor {
    // ---
    raw: String,
    scheme: String,
    host: String,
    port: String,
    path: String,
    params: ConnParams,
}

impl UriDescriptor {
    // ---

    pub fn parse(uri: &str) -> Result<Self> {
        // ---
        let raw = uri.trim();
        if raw.is_empty() {
            return Err(XmitError::config("empty medium URI"));
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            // Bare path.
            return Ok(Self {
                raw: raw.to_string(),
                scheme: "file".into(),
                host: String::new(),
                port: String::new(),
                path: raw.to_string(),
                params: ConnParams::new(),
            });
        };

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(XmitError::config(format!("invalid scheme in URI '{raw}'")));
        }

        let (locator, query) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };

        let (authority, path) = match locator.find('/') {
            Some(i) => (&locator[..i], &locator[i..]),
            None => (locator, ""),
        };

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| XmitError::config(format!("malformed host in URI '{raw}'")))?;

        let mut params = ConnParams::new();
        if let Some(q) = query {
            for pair in q.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => params.insert(k, v),
                    None => params.insert(pair, ""),
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port: port.to_string(),
            path: path.to_string(),
            params,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port exactly as written; empty when absent.
    pub fn port_str(&self) -> &str {
        &self.port
    }

    /// The port as a number, `None` when absent or not a valid port.
    pub fn port(&self) -> Option<u16> {
        self.port.parse().ok()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &ConnParams {
        &self.params
    }

    /// Merge extra parameters (carry-over from a previous incarnation of the
    /// same slot) over the ones written in the URI.
    pub fn merge_params(&mut self, extra: &ConnParams) {
        self.params.merge(extra);
    }
}

impl fmt::Display for UriDescriptor {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---

/// Split `host:port`, `:port`, `host`, or `[v6]:port`.
fn split_host_port(authority: &str) -> Option<(&str, &str)> {
    // ---
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, tail) = stripped.split_once(']')?;
        return match tail {
            "" => Some((host, "")),
            t => t.strip_prefix(':').map(|p| (host, p)),
        };
    }
    match authority.rsplit_once(':') {
        Some((h, _)) if h.contains(':') => None,
        Some((h, p)) => Some((h, p)),
        None => Some((authority, "")),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn full_form() {
        // ---
        let u = UriDescriptor::parse("lrt://10.0.0.7:9000?mode=caller&latency=120").unwrap();
        assert_eq!(u.scheme(), "lrt");
        assert_eq!(u.host(), "10.0.0.7");
        assert_eq!(u.port(), Some(9000));
        assert_eq!(u.params().get("mode"), Some("caller"));
        assert_eq!(u.params().get("latency"), Some("120"));
        assert_eq!(u.params().len(), 2);
    }

    // ---

    #[test]
    fn empty_host_with_port() {
        // ---
        let u = UriDescriptor::parse("udp://:5000").unwrap();
        assert_eq!(u.scheme(), "udp");
        assert_eq!(u.host(), "", "empty host means every interface");
        assert_eq!(u.port(), Some(5000));
        assert!(u.params().is_empty());
    }

    // ---

    #[test]
    fn bracketed_ipv6() {
        // ---
        let u = UriDescriptor::parse("udp://[::1]:4200?ttl=2").unwrap();
        assert_eq!(u.host(), "::1");
        assert_eq!(u.port(), Some(4200));
        assert_eq!(u.params().get("ttl"), Some("2"));
        assert!(UriDescriptor::parse("udp://::1:4200").is_err());
    }

    // ---

    #[test]
    fn file_forms() {
        // ---
        let con = UriDescriptor::parse("file://con").unwrap();
        assert_eq!(con.scheme(), "file");
        assert_eq!(con.host(), "con");

        let path = UriDescriptor::parse("file:///var/tmp/a.ts").unwrap();
        assert_eq!(path.host(), "");
        assert_eq!(path.path(), "/var/tmp/a.ts");

        let bare = UriDescriptor::parse("/var/tmp/a.ts").unwrap();
        assert_eq!(bare.scheme(), "file");
        assert_eq!(bare.path(), "/var/tmp/a.ts");
    }

    // ---

    #[test]
    fn unparsable_port_kept_raw() {
        // ---
        let u = UriDescriptor::parse("lrt://host:http").unwrap();
        assert_eq!(u.port_str(), "http");
        assert_eq!(u.port(), None);
    }

    // ---

    #[test]
    fn rejects_garbage() {
        // ---
        assert!(UriDescriptor::parse("").is_err());
        assert!(UriDescriptor::parse("://host:1").is_err());
        assert!(UriDescriptor::parse("u d p://host:1").is_err());
    }

    // ---

    #[test]
    fn flag_without_value() {
        // ---
        let u = UriDescriptor::parse("udp://239.1.1.1:5000?multicast").unwrap();
        assert!(u.params().contains("multicast"));
        assert_eq!(u.params().get("multicast"), Some(""));
    }
}
