//! Message framing on the byte stream.
//!
//! Wire format: a 4-byte big-endian length followed by the payload. A
//! rendezvous connection starts with one hello frame carrying the sender's
//! contest cookie.

use std::io::{self, Read, Write};

// ---

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mio::net::TcpStream;

// ---

use crate::MAX_MESSAGE;

// ---

pub(crate) const HEADER_LEN: usize = 4;

const HELLO_MAGIC: [u8; 8] = *b"LRTRDVZ1";
const HELLO_LEN: usize = HELLO_MAGIC.len() + 8;

/// Stop pulling from the kernel once this much is buffered.
const RX_HIGH_WATER: usize = 4 << 20;

const READ_SLICE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(buf: &mut BytesMut, payload: &[u8]) {
    // ---
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decoded {
    // ---
    Frame(Bytes),
    Incomplete,
    /// The length prefix announced more than any peer may send.
    Oversized(usize),
}

pub(crate) fn decode(buf: &mut BytesMut) -> Decoded {
    // ---
    if buf.len() < HEADER_LEN {
        return Decoded::Incomplete;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE {
        return Decoded::Oversized(len);
    }
    if buf.len() < HEADER_LEN + len {
        return Decoded::Incomplete;
    }
    buf.advance(HEADER_LEN);
    Decoded::Frame(buf.split_to(len).freeze())
}

/// True when `buf` holds at least one whole frame.
pub(crate) fn has_frame(buf: &BytesMut) -> bool {
    // ---
    if buf.len() < HEADER_LEN {
        return false;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    buf.len() >= HEADER_LEN + len
}

pub(crate) fn encode_hello(buf: &mut BytesMut, cookie: u64) {
    // ---
    let mut payload = [0u8; HELLO_LEN];
    payload[..8].copy_from_slice(&HELLO_MAGIC);
    payload[8..].copy_from_slice(&cookie.to_be_bytes());
    encode(buf, &payload);
}

pub(crate) fn parse_hello(payload: &[u8]) -> Option<u64> {
    // ---
    if payload.len() != HELLO_LEN || payload[..8] != HELLO_MAGIC {
        return None;
    }
    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&payload[8..]);
    Some(u64::from_be_bytes(cookie))
}

// ---------------------------------------------------------------------------
// Stream pumping
// ---------------------------------------------------------------------------

/// Read everything the kernel has into `rx`.
///
/// Returns `Ok(true)` when the peer closed its side. With `discard` set the
/// bytes are dropped instead of buffered (send-only sockets).
pub(crate) fn fill(stream: &mut TcpStream, rx: &mut BytesMut, discard: bool) -> io::Result<bool> {
    // ---
    let mut scratch = [0u8; READ_SLICE];
    loop {
        if !discard && rx.len() >= RX_HIGH_WATER {
            return Ok(false);
        }
        match stream.read(&mut scratch) {
            Ok(0) => return Ok(true),
            Ok(n) => {
                if !discard {
                    rx.extend_from_slice(&scratch[..n]);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write as much of `tx` as the kernel takes.
pub(crate) fn flush(stream: &mut TcpStream, tx: &mut BytesMut) -> io::Result<()> {
    // ---
    while !tx.is_empty() {
        match stream.write(&tx[..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => tx.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn decode_waits_for_whole_frame() {
        // ---
        let mut buf = BytesMut::new();
        encode(&mut buf, b"abcdef");
        let tail = buf.split_off(7);

        assert_eq!(decode(&mut buf), Decoded::Incomplete);
        assert!(!has_frame(&buf));

        buf.unsplit(tail);
        assert!(has_frame(&buf));
        assert_eq!(decode(&mut buf), Decoded::Frame(Bytes::from_static(b"abcdef")));
        assert!(buf.is_empty());
    }

    // ---

    #[test]
    fn frames_keep_boundaries() {
        // ---
        let mut buf = BytesMut::new();
        encode(&mut buf, b"one");
        encode(&mut buf, b"");
        encode(&mut buf, b"three");

        assert_eq!(decode(&mut buf), Decoded::Frame(Bytes::from_static(b"one")));
        assert_eq!(decode(&mut buf), Decoded::Frame(Bytes::new()));
        assert_eq!(decode(&mut buf), Decoded::Frame(Bytes::from_static(b"three")));
        assert_eq!(decode(&mut buf), Decoded::Incomplete);
    }

    // ---

    #[test]
    fn oversized_length_detected() {
        // ---
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_MESSAGE + 1) as u32);
        assert_eq!(decode(&mut buf), Decoded::Oversized(MAX_MESSAGE + 1));
    }

    // ---

    #[test]
    fn hello_parses_only_itself() {
        // ---
        let mut buf = BytesMut::new();
        encode_hello(&mut buf, 0x0123_4567_89AB_CDEF);
        let Decoded::Frame(payload) = decode(&mut buf) else {
            panic!("hello frame should decode");
        };
        assert_eq!(parse_hello(&payload), Some(0x0123_4567_89AB_CDEF));
        assert_eq!(parse_hello(b"LRTRDVZ1"), None, "short payload");
        assert_eq!(parse_hello(&[0u8; HELLO_LEN]), None, "wrong magic");
    }
}
