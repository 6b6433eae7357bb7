//! Typed accessors over a packet payload (spec §4.2, component C2).
//!
//! Every `read_*` function takes the remaining slice and returns the parsed
//! value together with the remaining slice, so callers thread `data` through
//! a chain of reads without tracking a cursor by hand.

use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE, U64 as U64LE};

fn eof() -> Error {
    Error::internal("unexpected end of packet")
}

pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    if data.is_empty() {
        return Err(eof());
    }
    Ok((data[0], &data[1..]))
}

pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(eof());
    }
    let value = U16LE::ref_from_bytes(&data[..2])
        .map_err(|_| Error::internal("bad u16"))?
        .get();
    Ok((value, &data[2..]))
}

pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 3 {
        return Err(eof());
    }
    let value = u32::from_le_bytes([data[0], data[1], data[2], 0]);
    Ok((value, &data[3..]))
}

pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(eof());
    }
    let value = U32LE::ref_from_bytes(&data[..4])
        .map_err(|_| Error::internal("bad u32"))?
        .get();
    Ok((value, &data[4..]))
}

pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(eof());
    }
    let value = U64LE::ref_from_bytes(&data[..8])
        .map_err(|_| Error::internal("bad u64"))?
        .get();
    Ok((value, &data[8..]))
}

/// Length-encoded integer, per spec §4.2: `< 0xFB` literal, `0xFC` u16,
/// `0xFD` u24, `0xFE` u64. `0xFB` is reserved for NULL and is rejected here;
/// use [`read_int_lenenc_or_null`] wherever NULL is meaningful (row values).
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_int_lenenc_or_null(data)? {
        (Some(v), rest) => Ok((v, rest)),
        (None, _) => Err(Error::internal("unexpected NULL length-encoded integer")),
    }
}

pub fn read_int_lenenc_or_null(data: &[u8]) -> Result<(Option<u64>, &[u8])> {
    if data.is_empty() {
        return Err(eof());
    }
    match data[0] {
        0xFB => Ok((None, &data[1..])),
        0xFC => {
            let (val, rest) = read_int_2(&data[1..])?;
            Ok((Some(val as u64), rest))
        }
        0xFD => {
            let (val, rest) = read_int_3(&data[1..])?;
            Ok((Some(val as u64), rest))
        }
        0xFE => {
            let (val, rest) = read_int_8(&data[1..])?;
            Ok((Some(val), rest))
        }
        val => Ok((Some(val as u64), &data[1..])),
    }
}

pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(eof());
    }
    Ok((&data[..len], &data[len..]))
}

/// NUL-terminated byte run; `None` if no NUL is present (spec §4.2).
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&b| b == 0) {
        Some(i) => Ok((&data[..i], &data[i + 1..])),
        None => Err(eof()),
    }
}

/// Length-encoded string; `None` when the length prefix is NULL.
pub fn read_string_lenenc(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    let (len, rest) = read_int_lenenc_or_null(data)?;
    match len {
        Some(len) => {
            let (s, rest) = read_string_fix(rest, len as usize)?;
            Ok((Some(s), rest))
        }
        None => Ok((None, rest)),
    }
}

pub fn read_string_eof(data: &[u8]) -> &[u8] {
    data
}

pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Length-encoded integer, choosing the shortest prefix that fits (spec §8).
pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xfc);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xfd);
        write_int_3(out, value as u32);
    } else {
        out.push(0xfe);
        write_int_8(out, value);
    }
}

pub fn write_bytes_fix(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub fn write_string_lenenc(out: &mut Vec<u8>, s: &str) {
    write_bytes_lenenc(out, s.as_bytes());
}

pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_int_roundtrip() {
        for n in [0u64, 1, 250, 251, 252, 0xFFFF, 0x10000, 0xFFFFFF, 0x1000000, u64::MAX] {
            let mut buf = Vec::new();
            write_int_lenenc(&mut buf, n);
            let (decoded, rest) = read_int_lenenc(&buf).unwrap();
            assert_eq!(decoded, n);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn lenenc_int_chooses_shortest_prefix() {
        let mut buf = Vec::new();
        write_int_lenenc(&mut buf, 250);
        assert_eq!(buf, vec![250]);

        let mut buf = Vec::new();
        write_int_lenenc(&mut buf, 251);
        assert_eq!(buf[0], 0xfc);

        let mut buf = Vec::new();
        write_int_lenenc(&mut buf, 1 << 16);
        assert_eq!(buf[0], 0xfd);

        let mut buf = Vec::new();
        write_int_lenenc(&mut buf, 1 << 24);
        assert_eq!(buf[0], 0xfe);
    }

    #[test]
    fn lenenc_int_0xfb_is_null_not_251() {
        let (value, rest) = read_int_lenenc_or_null(&[0xFB, 0xAA]).unwrap();
        assert_eq!(value, None);
        assert_eq!(rest, &[0xAA]);
    }

    #[test]
    fn string_null_terminated() {
        let (s, rest) = read_string_null(b"hello\0world").unwrap();
        assert_eq!(s, b"hello");
        assert_eq!(rest, b"world");
    }
}
