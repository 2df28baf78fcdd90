// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! MySQL handshake V10
//!
//! Sequence:
//! 1. Server sends the initial handshake (protocol 10)
//! 2. Client responds with HandshakeResponse41
//! 3. Auth negotiation (switch / more-data), then OK or ERR

use crate::constants::*;
use crate::packet::{PacketBuf, PacketReader};
use proxy_common::{ProxyError, Result};
use rand::Rng;

pub const SALT_LEN: usize = 20;

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt[..]);
    salt
}

/// Initial handshake packet sent by the server.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub salt: [u8; SALT_LEN],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    pub fn new(connection_id: u32, server_version: &str) -> InitialHandshake {
        InitialHandshake {
            protocol_version: PROTOCOL_VERSION,
            server_version: server_version.to_string(),
            connection_id,
            salt: random_salt(),
            capability_flags: DEFAULT_CAPABILITIES,
            character_set: UTF8MB4_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: AUTH_CACHING_SHA2_PASSWORD.to_string(),
        }
    }

    /// Encodes the exact V10 layout.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let length = 1 // protocol version
            + self.server_version.len() + 1
            + 4 // connection id
            + 8 // first part of the salt
            + 1 // filler
            + 2 // capability flags, lower 2 bytes
            + 1 // character set
            + 2 // status flags
            + 2 // capability flags, upper 2 bytes
            + 1 // auth plugin data length, always 21
            + 10 // reserved
            + 12 + 1 // remaining salt + terminator
            + self.auth_plugin_name.len() + 1;

        let mut buf = PacketBuf::new(length);
        buf.write_u8(self.protocol_version);
        buf.write_null_string(&self.server_version);
        buf.write_u32(self.connection_id);
        buf.write_bytes(&self.salt[..8]);
        buf.write_u8(0);
        buf.write_u16((self.capability_flags & 0xFFFF) as u16);
        buf.write_u8(self.character_set);
        buf.write_u16(self.status_flags);
        buf.write_u16((self.capability_flags >> 16) as u16);
        // Total auth plugin data length: 8 + 12 + terminator.
        buf.write_u8(21);
        buf.write_zeroes(10);
        buf.write_bytes(&self.salt[8..]);
        buf.write_u8(0);
        buf.write_null_string(&self.auth_plugin_name);
        buf.into_payload()
    }

    /// Decodes a V10 payload. Used by tests and by the mock client.
    pub fn parse(payload: &[u8]) -> Result<InitialHandshake> {
        let mut r = PacketReader::new(payload);
        let protocol_version = r.read_u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProxyError::Protocol(format!(
                "unsupported protocol version {protocol_version}"
            )));
        }
        let server_version = r.read_null_string()?;
        let connection_id = r.read_u32()?;
        let mut salt = [0u8; SALT_LEN];
        salt[..8].copy_from_slice(r.read_bytes(8)?);
        r.skip(1)?; // filler
        let cap_lower = r.read_u16()? as u32;
        let character_set = r.read_u8()?;
        let status_flags = r.read_u16()?;
        let cap_upper = r.read_u16()? as u32;
        let auth_data_len = r.read_u8()?;
        if auth_data_len != 21 {
            return Err(ProxyError::Protocol(format!(
                "unexpected auth plugin data length {auth_data_len}"
            )));
        }
        r.skip(10)?;
        salt[8..].copy_from_slice(r.read_bytes(12)?);
        r.skip(1)?; // salt terminator
        let auth_plugin_name = r.read_null_string()?;

        Ok(InitialHandshake {
            protocol_version,
            server_version,
            connection_id,
            salt,
            capability_flags: cap_lower | (cap_upper << 16),
            character_set,
            status_flags,
            auth_plugin_name,
        })
    }
}

/// Handshake response from the client (protocol 4.1).
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponse {
    pub fn parse(payload: &[u8]) -> Result<HandshakeResponse> {
        let mut r = PacketReader::new(payload);

        let capability_flags = r.read_u32()?;
        if capability_flags & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProxyError::Protocol(
                "only protocol 4.1 clients are supported".to_string(),
            ));
        }
        let max_packet_size = r.read_u32()?;
        let character_set = r.read_u8()?;
        r.skip(23)?; // reserved
        let username = r.read_null_string()?;

        let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            r.read_len_enc_string()?.to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = r.read_u8()? as usize;
            r.read_bytes(len)?.to_vec()
        } else {
            r.read_null_string()?.into_bytes()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            let db = r.read_null_string()?;
            if db.is_empty() {
                None
            } else {
                Some(db)
            }
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            let name = r.read_null_string().unwrap_or_default();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        } else {
            None
        };

        Ok(HandshakeResponse {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    /// Encodes a client response. Used by tests and by the mock client.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.capability_flags.to_le_bytes());
        out.extend_from_slice(&self.max_packet_size.to_le_bytes());
        out.push(self.character_set);
        out.extend_from_slice(&[0u8; 23]);
        out.extend_from_slice(self.username.as_bytes());
        out.push(0);
        if self.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            let mut buf = PacketBuf::new(crate::packet::len_enc_string_size(&self.auth_response));
            buf.write_len_enc_string(&self.auth_response);
            out.extend_from_slice(&buf.into_payload().expect("sized above"));
        } else if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            out.push(self.auth_response.len() as u8);
            out.extend_from_slice(&self.auth_response);
        } else {
            out.extend_from_slice(&self.auth_response);
            out.push(0);
        }
        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = &self.database {
                out.extend_from_slice(db.as_bytes());
            }
            out.push(0);
        }
        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            if let Some(name) = &self.auth_plugin_name {
                out.extend_from_slice(name.as_bytes());
            }
            out.push(0);
        }
        out
    }
}
