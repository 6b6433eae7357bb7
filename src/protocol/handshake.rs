//! Handshake v10 parsing/encoding and the mid-stream TLS upgrade packet
//! (spec §4.4).

use crate::constant::CapabilityFlags;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::ErrPayloadBytes;
use zerocopy::byteorder::little_endian::U32 as U32LE;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The server's initial handshake packet (`Protocol::HandshakeV10`).
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;

    if protocol_version == 0xFF {
        return Err(Error::from(ErrPayloadBytes(payload)));
    }
    if protocol_version != 10 {
        return Err(Error::NotSupportedError(format!(
            "unsupported handshake protocol version {protocol_version}"
        )));
    }

    let (server_version_bytes, data) = read_string_null(data)?;
    let server_version = String::from_utf8_lossy(server_version_bytes).to_string();

    let (connection_id, data) = read_int_4(data)?;
    let (auth_data_1, data) = read_string_fix(data, 8)?;
    let (_filler, data) = read_int_1(data)?;
    let (cap_lower, data) = read_int_2(data)?;
    let (charset, data) = read_int_1(data)?;
    let (status_flags, data) = read_int_2(data)?;
    let (cap_upper, data) = read_int_2(data)?;

    let cap_bits = ((cap_upper as u32) << 16) | (cap_lower as u32);
    let capability_flags = CapabilityFlags::from_bits_truncate(cap_bits);

    let (auth_data_len, data) = read_int_1(data)?;
    let (_reserved, data) = read_string_fix(data, 10)?;

    let auth_data_2_len = (auth_data_len as usize).saturating_sub(8).max(13).saturating_sub(1);
    let (auth_data_2, data) = read_string_fix(data, auth_data_2_len)?;
    let (_trailing_nul, data) = read_int_1(data)?;

    let mut auth_plugin_data = Vec::new();
    auth_plugin_data.extend_from_slice(auth_data_1);
    auth_plugin_data.extend_from_slice(auth_data_2);

    let auth_plugin_name = if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        let (name, _rest) = read_string_null(data)?;
        String::from_utf8_lossy(name).to_string()
    } else {
        String::new()
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data,
        capability_flags,
        charset,
        status_flags,
        auth_plugin_name,
    })
}

/// The client's `HandshakeResponse41`.
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a str>,
    pub connect_attrs: &'a [(String, String)],
}

pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41) {
    write_int_4(out, response.capability_flags.bits());
    write_int_4(out, response.max_packet_size);
    write_int_1(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);

    write_string_null(out, response.username);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_bytes_lenenc(out, response.auth_response);
    } else {
        write_int_1(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        if let Some(db) = response.database {
            write_string_null(out, db);
        }
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        if let Some(plugin) = response.auth_plugin_name {
            write_string_null(out, plugin);
        }
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
    {
        let mut attrs_buf = Vec::new();
        for (k, v) in response.connect_attrs {
            write_string_lenenc(&mut attrs_buf, k);
            write_string_lenenc(&mut attrs_buf, v);
        }
        write_int_lenenc(out, attrs_buf.len() as u64);
        out.extend_from_slice(&attrs_buf);
    }
}

/// Auth-switch request from the server (header `0xFE`, length >= 9).
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::internal("auth switch request: bad header byte"));
    }

    let (plugin_name, data) = read_string_null(data)?;
    // The scramble is NUL-terminated too, but some servers omit the
    // trailing NUL for the final plugin in the chain; treat EOF as the end.
    let plugin_data = if let Some(0) = data.last().copied() {
        data[..data.len() - 1].to_vec()
    } else {
        data.to_vec()
    };

    Ok(AuthSwitchRequest {
        plugin_name: String::from_utf8_lossy(plugin_name).to_string(),
        plugin_data,
    })
}

pub fn write_auth_switch_response(out: &mut Vec<u8>, auth_data: &[u8]) {
    out.extend_from_slice(auth_data);
}

/// `0x01`-prefixed extra-auth-data packet (fast-auth result, or the
/// `dialog`/`caching_sha2`/`sha256` full-auth continuation byte).
pub fn read_extra_auth_data(payload: &[u8]) -> Result<&[u8]> {
    let (header, data) = read_int_1(payload)?;
    if header != 0x01 {
        return Err(Error::internal("extra auth data: bad header byte"));
    }
    Ok(data)
}

/// The short, capabilities-only packet sent before a mid-stream TLS upgrade
/// (spec §9: client sends this, then negotiates TLS on the same socket,
/// then sends the real `HandshakeResponse41` over the encrypted channel).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct SslRequest {
    client_flag: U32LE,
    max_packet_size: U32LE,
    character_set: u8,
    filler: [u8; 23],
}

impl SslRequest {
    pub fn new(client_flag: CapabilityFlags, max_packet_size: u32, character_set: u8) -> Self {
        Self {
            client_flag: U32LE::new(client_flag.bits()),
            max_packet_size: U32LE::new(max_packet_size),
            character_set,
            filler: [0u8; 23],
        }
    }
}

pub fn write_ssl_request(out: &mut Vec<u8>, request: &SslRequest) {
    out.extend_from_slice(request.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_handshake() -> Vec<u8> {
        let mut buf = Vec::new();
        write_int_1(&mut buf, 10);
        write_string_null(&mut buf, "8.0.34");
        write_int_4(&mut buf, 7);
        buf.extend_from_slice(b"AAAAAAAA"); // auth-plugin-data-part-1 (8 bytes)
        write_int_1(&mut buf, 0);
        write_int_2(&mut buf, 0xffff); // cap lower
        write_int_1(&mut buf, 33); // charset
        write_int_2(&mut buf, 2); // status
        write_int_2(&mut buf, 0xffff); // cap upper
        write_int_1(&mut buf, 21); // auth data len
        buf.extend_from_slice(&[0u8; 10]);
        buf.extend_from_slice(b"BBBBBBBBBBBB\0"); // auth-plugin-data-part-2 + NUL
        write_string_null(&mut buf, "mysql_native_password");
        buf
    }

    #[test]
    fn parses_initial_handshake() {
        let hs = read_initial_handshake(&sample_handshake()).unwrap();
        assert_eq!(hs.protocol_version, 10);
        assert_eq!(hs.server_version, "8.0.34");
        assert_eq!(hs.connection_id, 7);
        assert_eq!(hs.auth_plugin_name, "mysql_native_password");
        assert_eq!(hs.auth_plugin_data.len(), 20);
    }

    #[test]
    fn auth_switch_request_strips_trailing_nul() {
        let mut buf = Vec::new();
        write_int_1(&mut buf, 0xFE);
        write_string_null(&mut buf, "caching_sha2_password");
        buf.extend_from_slice(b"01234567890123456789\0");
        let req = read_auth_switch_request(&buf).unwrap();
        assert_eq!(req.plugin_name, "caching_sha2_password");
        assert_eq!(req.plugin_data.len(), 20);
    }
}
