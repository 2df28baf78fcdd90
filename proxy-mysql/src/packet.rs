// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! MySQL packet primitives
//!
//! Wire layout per packet:
//! ```text
//! [3 bytes: payload length, little-endian]
//! [1 byte: sequence number]
//! [N bytes: payload]
//! ```
//!
//! [`PacketBuf`] is the write side of the ephemeral-packet pattern: the
//! caller reserves an exact-size buffer, fills it with positional writers,
//! and the connection refuses to send a short or over-long packet.

use byteorder::{ByteOrder, LittleEndian};
use proxy_common::{ProxyError, Result};

/// 16MB - 1, the largest single-packet payload.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Size of a length-encoded integer: 1, 3, 4, or 9 bytes.
pub fn len_enc_int_size(n: u64) -> usize {
    if n < 251 {
        1
    } else if n < 1 << 16 {
        3
    } else if n < 1 << 24 {
        4
    } else {
        9
    }
}

pub fn len_enc_string_size(s: &[u8]) -> usize {
    len_enc_int_size(s.len() as u64) + s.len()
}

/// Exact-size positional packet writer.
#[derive(Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    pos: usize,
}

impl PacketBuf {
    pub fn new(len: usize) -> PacketBuf {
        PacketBuf {
            data: vec![0u8; len],
            pos: 0,
        }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data[self.pos] = v;
        self.pos += 1;
    }

    pub fn write_u16(&mut self, v: u16) {
        LittleEndian::write_u16(&mut self.data[self.pos..], v);
        self.pos += 2;
    }

    pub fn write_u24(&mut self, v: u32) {
        LittleEndian::write_u24(&mut self.data[self.pos..], v);
        self.pos += 3;
    }

    pub fn write_u32(&mut self, v: u32) {
        LittleEndian::write_u32(&mut self.data[self.pos..], v);
        self.pos += 4;
    }

    pub fn write_u64(&mut self, v: u64) {
        LittleEndian::write_u64(&mut self.data[self.pos..], v);
        self.pos += 8;
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.data[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    pub fn write_null_string(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
        self.write_u8(0);
    }

    pub fn write_zeroes(&mut self, n: usize) {
        // Buffer starts zero-filled; just advance.
        self.pos += n;
    }

    pub fn write_len_enc_int(&mut self, v: u64) {
        if v < 251 {
            self.write_u8(v as u8);
        } else if v < 1 << 16 {
            self.write_u8(0xFC);
            self.write_u16(v as u16);
        } else if v < 1 << 24 {
            self.write_u8(0xFD);
            self.write_u24(v as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64(v);
        }
    }

    pub fn write_len_enc_string(&mut self, v: &[u8]) {
        self.write_len_enc_int(v.len() as u64);
        self.write_bytes(v);
    }

    /// Consumes the buffer, checking the exact-fill invariant. A short or
    /// over-long write is an internal error: every ephemeral writer computes
    /// its packet length up front.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        if self.pos != self.data.len() {
            return Err(ProxyError::Internal(format!(
                "packet writer used {} bytes of {}",
                self.pos,
                self.data.len()
            )));
        }
        Ok(self.data)
    }
}

/// Positional packet reader over a borrowed payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> PacketReader<'a> {
        PacketReader { data, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProxyError::Protocol(format!(
                "packet truncated: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u24(self.take(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_null_string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProxyError::Protocol("unterminated string".to_string()))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    pub fn read_len_enc_int(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match first {
            0..=250 => Ok(first as u64),
            0xFC => Ok(self.read_u16()? as u64),
            0xFD => Ok(self.read_u24()? as u64),
            0xFE => self.read_u64(),
            _ => Err(ProxyError::Protocol(
                "invalid length-encoded integer".to_string(),
            )),
        }
    }

    pub fn read_len_enc_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len_enc_int()? as usize;
        self.take(len)
    }

    /// Everything left in the payload.
    pub fn read_eof_bytes(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_enc_int_size() {
        assert_eq!(len_enc_int_size(250), 1);
        assert_eq!(len_enc_int_size(251), 3);
        assert_eq!(len_enc_int_size(0xFFFF), 3);
        assert_eq!(len_enc_int_size(0x10000), 4);
        assert_eq!(len_enc_int_size(0xFFFFFF), 4);
        assert_eq!(len_enc_int_size(0x1000000), 9);
    }

    #[test]
    fn test_len_enc_int_round_trip() {
        for v in [0u64, 250, 251, 1000, 0xFFFF, 0x10000, 0xFFFFFF, u64::MAX] {
            let size = len_enc_int_size(v);
            let mut buf = PacketBuf::new(size);
            buf.write_len_enc_int(v);
            let payload = buf.into_payload().unwrap();
            assert_eq!(payload.len(), size);
            let mut reader = PacketReader::new(&payload);
            assert_eq!(reader.read_len_enc_int().unwrap(), v);
        }
    }

    #[test]
    fn test_len_enc_string_round_trip() {
        let s = b"hello world";
        let mut buf = PacketBuf::new(len_enc_string_size(s));
        buf.write_len_enc_string(s);
        let payload = buf.into_payload().unwrap();
        let mut reader = PacketReader::new(&payload);
        assert_eq!(reader.read_len_enc_string().unwrap(), s);
    }

    #[test]
    fn test_exact_fill_enforced() {
        let mut buf = PacketBuf::new(4);
        buf.write_u16(7);
        assert!(buf.into_payload().is_err());

        let mut buf = PacketBuf::new(4);
        buf.write_u32(7);
        assert!(buf.into_payload().is_ok());
    }

    #[test]
    fn test_fixed_width_round_trip() {
        let mut buf = PacketBuf::new(1 + 2 + 3 + 4 + 8);
        buf.write_u8(0xAB);
        buf.write_u16(0xBEEF);
        buf.write_u24(0xC0FFEE);
        buf.write_u32(0xDEADBEEF);
        buf.write_u64(0x0102030405060708);
        let payload = buf.into_payload().unwrap();

        let mut reader = PacketReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.read_u24().unwrap(), 0xC0FFEE);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_null_string() {
        let mut buf = PacketBuf::new(6);
        buf.write_null_string("hello");
        let payload = buf.into_payload().unwrap();
        let mut reader = PacketReader::new(&payload);
        assert_eq!(reader.read_null_string().unwrap(), "hello");

        let no_nul = [b'x', b'y'];
        let mut reader = PacketReader::new(&no_nul);
        assert!(reader.read_null_string().is_err());
    }

    #[test]
    fn test_truncated_read_is_protocol_error() {
        let data = [0x01];
        let mut reader = PacketReader::new(&data);
        assert!(reader.read_u32().is_err());
    }
}
