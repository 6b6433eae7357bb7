//! OK/ERR/EOF payload parsing (spec §3 Packet, §4.2, §4.5).

use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// The payload part of an OK (or, in `CLIENT_DEPRECATE_EOF` mode, EOF-as-OK) packet.
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

/// The OK packet parsed from [`OkPayloadBytes`].
#[derive(Debug, Clone)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::internal("OK packet: bad header byte"));
        }

        let (affected_rows, data) = read_int_lenenc(data)?;
        let (last_insert_id, data) = read_int_lenenc(data)?;
        let (status_flags, data) = read_int_2(data)?;
        let (warnings, data) = read_int_2(data)?;
        let info = String::from_utf8_lossy(read_string_eof(data)).to_string();

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_truncate(status_flags),
            warnings,
            info,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// The ERR packet parsed from [`ErrPayloadBytes`].
#[derive(Debug, Clone)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0xFF {
            return Err(Error::internal("ERR packet: bad header byte"));
        }

        let (error_code, data) = read_int_2(data)?;

        // Pre-4.1 servers omit the SQLSTATE marker/field entirely.
        if data.first() == Some(&b'#') {
            let (_marker, data) = read_string_fix(data, 1)?;
            let (sql_state, data) = read_string_fix(data, 5)?;
            Ok(ErrPayload {
                error_code,
                sql_state: String::from_utf8_lossy(sql_state).to_string(),
                message: String::from_utf8_lossy(read_string_eof(data)).to_string(),
            })
        } else {
            Ok(ErrPayload {
                error_code,
                sql_state: String::new(),
                message: String::from_utf8_lossy(read_string_eof(data)).to_string(),
            })
        }
    }
}

impl From<ErrPayloadBytes<'_>> for Error {
    fn from(bytes: ErrPayloadBytes<'_>) -> Self {
        match ErrPayload::try_from(bytes) {
            Ok(err) => Error::from_server_error(err.error_code, &err.sql_state, &err.message),
            Err(e) => e,
        }
    }
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    warnings: U16LE,
    status_flags: U16LE,
}

impl EofPacket {
    pub fn warnings(&self) -> u16 {
        self.warnings.get()
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_truncate(self.status_flags.get())
    }
}

/// Read an EOF packet (header byte 0xFE, length < 9).
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::internal("EOF packet: bad header byte"));
    }
    if data.len() < 4 {
        return Err(Error::internal("EOF packet: too short"));
    }
    EofPacket::ref_from_bytes(&data[..4]).map_err(|_| Error::internal("EOF packet: bad layout"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_payload_roundtrip() {
        let mut buf = Vec::new();
        write_int_1(&mut buf, 0x00);
        write_int_lenenc(&mut buf, 3);
        write_int_lenenc(&mut buf, 42);
        write_int_2(&mut buf, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT.bits());
        write_int_2(&mut buf, 0);
        let payload = OkPayload::try_from(OkPayloadBytes(&buf)).unwrap();
        assert_eq!(payload.affected_rows, 3);
        assert_eq!(payload.last_insert_id, 42);
    }

    #[test]
    fn err_payload_parses_sqlstate() {
        let mut buf = Vec::new();
        write_int_1(&mut buf, 0xFF);
        write_int_2(&mut buf, 1045);
        buf.extend_from_slice(b"#28000");
        buf.extend_from_slice(b"Access denied");
        let payload = ErrPayload::try_from(ErrPayloadBytes(&buf)).unwrap();
        assert_eq!(payload.error_code, 1045);
        assert_eq!(payload.sql_state, "28000");
        assert_eq!(payload.message, "Access denied");
    }
}
