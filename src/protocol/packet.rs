//! Packet framing (spec §4.1, component C1).
//!
//! A frame is `length:3LE ‖ seq:1 ‖ payload`. A logical packet larger than
//! `MAX_FRAME_LEN` is split into `MAX_FRAME_LEN`-sized frames on write, with
//! a trailing empty frame appended iff the payload is an exact multiple of
//! `MAX_FRAME_LEN`. [`Session`](crate::session::Session) owns sequence-id
//! bookkeeping and stitches frames back into one packet on read, since both
//! require mutable session state; this module only encodes/decodes frames.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// 2^24 - 1: the largest payload a single frame can carry.
pub const MAX_FRAME_LEN: usize = 0xFF_FFFF;

/// Encode `payload` as one or more frames starting at sequence id `seq`, per
/// the fragmentation rule in spec §4.1. Returns the framed byte stream and
/// the sequence id to use for the *next* packet the caller writes.
pub fn encode_fragmented(payload: &[u8], mut seq: u8) -> (Vec<u8>, u8) {
    let trailing_empty = !payload.is_empty() && payload.len().is_multiple_of(MAX_FRAME_LEN);
    let num_chunks = payload.len().div_ceil(MAX_FRAME_LEN).max(1);
    let total_frames = num_chunks + usize::from(trailing_empty);
    let mut out = Vec::with_capacity(total_frames * 4 + payload.len());

    let mut remaining = payload;
    loop {
        let chunk_len = remaining.len().min(MAX_FRAME_LEN);
        let (chunk, rest) = remaining.split_at(chunk_len);
        write_frame_header(&mut out, seq, chunk_len);
        out.extend_from_slice(chunk);
        seq = seq.wrapping_add(1);
        remaining = rest;
        if remaining.is_empty() {
            break;
        }
    }
    if trailing_empty {
        write_frame_header(&mut out, seq, 0);
        seq = seq.wrapping_add(1);
    }
    (out, seq)
}

pub fn write_frame_header(out: &mut Vec<u8>, seq: u8, len: usize) {
    let bytes = (len as u32).to_le_bytes();
    out.extend_from_slice(&bytes[..3]);
    out.push(seq);
}

/// Read one frame's header + payload from `reader` into `buf` (replacing its
/// contents). Returns the frame's sequence id and payload length. Any I/O
/// failure here is fatal to the session (spec §4.1: `CR_SERVER_LOST`).
pub async fn read_one_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<(u8, usize)> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| Error::server_lost())?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];

    buf.clear();
    buf.resize(len, 0);
    reader
        .read_exact(buf)
        .await
        .map_err(|_| Error::server_lost())?;
    Ok((seq, len))
}

/// First-byte packet-kind predicates (spec §3, §4.5, §9 open question on
/// `is_auth_switch_request` vs `is_eof`).
pub fn is_ok(payload: &[u8]) -> bool {
    payload.first() == Some(&0x00) && payload.len() >= 7
}

pub fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

pub fn is_auth_switch_request(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() >= 9
}

pub fn is_err(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFF)
}

pub fn is_local_infile(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFB)
}

pub fn is_extra_auth_data(payload: &[u8]) -> bool {
    payload.first() == Some(&0x01)
}

pub fn is_resultset_header(payload: &[u8]) -> bool {
    matches!(payload.first(), Some(1..=0xFA))
}

pub fn invalid_packet(what: &str) -> Error {
    Error::internal(format!("invalid packet: {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_single_frame() {
        let (bytes, next_seq) = encode_fragmented(b"select 1", 0);
        assert_eq!(&bytes[..4], &[8, 0, 0, 0]);
        assert_eq!(&bytes[4..], b"select 1");
        assert_eq!(next_seq, 1);
    }

    #[test]
    fn exact_boundary_gets_trailing_empty_frame() {
        let payload = vec![0xABu8; MAX_FRAME_LEN];
        let (bytes, next_seq) = encode_fragmented(&payload, 5);
        assert_eq!(bytes.len(), 4 + MAX_FRAME_LEN + 4);
        let second_header = &bytes[4 + MAX_FRAME_LEN..4 + MAX_FRAME_LEN + 4];
        assert_eq!(
            u32::from_le_bytes([second_header[0], second_header[1], second_header[2], 0]),
            0
        );
        assert_eq!(next_seq, 7);
    }

    #[test]
    fn oversized_payload_splits_into_chunks_summing_to_original() {
        let payload = vec![0x11u8; MAX_FRAME_LEN + 5];
        let (bytes, next_seq) = encode_fragmented(&payload, 0);
        assert_eq!(bytes.len(), 4 + MAX_FRAME_LEN + 4 + 5);
        assert_eq!(next_seq, 2);
    }

    #[test]
    fn packet_kind_predicates() {
        assert!(is_ok(&[0x00, 0, 0, 0, 0, 0, 0]));
        assert!(is_eof(&[0xFE, 0, 0]));
        assert!(is_auth_switch_request(&[0xFE; 10]));
        assert!(!is_eof(&[0xFE; 10]));
        assert!(is_err(&[0xFF, 0]));
        assert!(is_local_infile(&[0xFB]));
        assert!(is_resultset_header(&[3]));
        assert!(!is_resultset_header(&[0xFB]));
    }
}
