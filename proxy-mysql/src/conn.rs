// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Per-connection packet state machine
//!
//! Owns packet framing, sequence-id tracking, the ephemeral write pattern,
//! and the response writers (OK/ERR/EOF, result sets, prepare responses).
//! Command semantics live in the server crate; this layer only moves
//! packets.

use crate::bind::BindVariable;
use crate::constants::*;
use crate::packet::{len_enc_int_size, len_enc_string_size, PacketBuf, PacketReader, MAX_PAYLOAD_LEN};
use crate::resultset::{Field, ResultSet};
use crate::types::MySqlType;
use crate::value::Value;
use proxy_common::{ProxyError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Atomic byte counter shared across connections of one listener.
#[derive(Debug, Clone, Default)]
pub struct FlowCounter(Arc<AtomicU64>);

impl FlowCounter {
    pub fn new() -> FlowCounter {
        FlowCounter::default()
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb(String),
    Query(String),
    FieldList(String),
    Ping,
    StmtPrepare(String),
    /// Raw execute payload; parameter decoding needs the statement's
    /// parameter count, which only the registry knows.
    StmtExecute(Vec<u8>),
    StmtClose(u32),
    StmtReset(u32),
    Unknown(u8),
}

impl Command {
    pub fn parse(payload: &[u8]) -> Result<Command> {
        let (&code, rest) = payload
            .split_first()
            .ok_or_else(|| ProxyError::Protocol("empty command packet".to_string()))?;
        let text = || String::from_utf8_lossy(rest).into_owned();
        let stmt_id = |data: &[u8]| -> Result<u32> { PacketReader::new(data).read_u32() };
        Ok(match code {
            COM_QUIT => Command::Quit,
            COM_INIT_DB => Command::InitDb(text()),
            COM_QUERY => Command::Query(text()),
            COM_FIELD_LIST => Command::FieldList(text()),
            COM_PING => Command::Ping,
            COM_STMT_PREPARE => Command::StmtPrepare(text()),
            COM_STMT_EXECUTE => Command::StmtExecute(rest.to_vec()),
            COM_STMT_CLOSE => Command::StmtClose(stmt_id(rest)?),
            COM_STMT_RESET => Command::StmtReset(stmt_id(rest)?),
            other => Command::Unknown(other),
        })
    }
}

pub struct Conn<S> {
    stream: BufWriter<S>,
    sequence_id: u8,
    ephemeral: Option<PacketBuf>,
    pub capabilities: u32,
    flow: FlowCounter,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Conn<S> {
    pub fn new(stream: S, flow: FlowCounter) -> Conn<S> {
        Conn {
            stream: BufWriter::new(stream),
            sequence_id: 0,
            ephemeral: None,
            capabilities: 0,
            flow,
        }
    }

    /// Resets the sequence id; called before each new client command.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Reads one logical packet, following 16MB continuation packets.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = self.read_frame().await?;
        if payload.len() == MAX_PAYLOAD_LEN {
            loop {
                let next = self.read_frame().await?;
                let done = next.len() < MAX_PAYLOAD_LEN;
                payload.extend_from_slice(&next);
                if done {
                    break;
                }
            }
        }
        Ok(payload)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        self.sequence_id = header[3].wrapping_add(1);
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Writes one packet, splitting payloads of 16MB or more.
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut remaining = payload;
        loop {
            let chunk_len = remaining.len().min(MAX_PAYLOAD_LEN);
            let (chunk, rest) = remaining.split_at(chunk_len);
            let mut header = [0u8; 4];
            header[..3].copy_from_slice(&(chunk_len as u32).to_le_bytes()[..3]);
            header[3] = self.sequence_id;
            self.sequence_id = self.sequence_id.wrapping_add(1);
            self.stream.write_all(&header).await?;
            self.stream.write_all(chunk).await?;
            self.flow.add(4 + chunk_len);
            remaining = rest;
            // A payload of exactly 16MB-1 needs an empty trailing packet.
            if remaining.is_empty() && chunk_len < MAX_PAYLOAD_LEN {
                break;
            }
        }
        Ok(())
    }

    /// Reserves an exact-size packet buffer for positional writers.
    pub fn start_ephemeral(&mut self, len: usize) -> &mut PacketBuf {
        self.ephemeral = Some(PacketBuf::new(len));
        self.ephemeral.as_mut().expect("just set")
    }

    /// Sends the reserved buffer, enforcing the exact-fill invariant.
    pub async fn write_ephemeral(&mut self) -> Result<()> {
        let buf = self
            .ephemeral
            .take()
            .ok_or_else(|| ProxyError::Internal("no ephemeral packet started".to_string()))?;
        let payload = buf.into_payload()?;
        self.write_packet(&payload).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn write_ok_packet(
        &mut self,
        affected_rows: u64,
        last_insert_id: u64,
        status: u16,
        warnings: u16,
    ) -> Result<()> {
        let len = 1
            + len_enc_int_size(affected_rows)
            + len_enc_int_size(last_insert_id)
            + 2
            + 2;
        let buf = self.start_ephemeral(len);
        buf.write_u8(OK_PACKET);
        buf.write_len_enc_int(affected_rows);
        buf.write_len_enc_int(last_insert_id);
        buf.write_u16(status);
        buf.write_u16(warnings);
        self.write_ephemeral().await?;
        self.flush().await
    }

    pub async fn write_err_packet(
        &mut self,
        code: u16,
        sql_state: &str,
        message: &str,
    ) -> Result<()> {
        debug_assert_eq!(sql_state.len(), 5);
        let len = 1 + 2 + 1 + sql_state.len() + message.len();
        let buf = self.start_ephemeral(len);
        buf.write_u8(ERR_PACKET);
        buf.write_u16(code);
        buf.write_u8(b'#');
        buf.write_bytes(sql_state.as_bytes());
        buf.write_bytes(message.as_bytes());
        self.write_ephemeral().await?;
        self.flush().await
    }

    pub async fn write_err(&mut self, err: &ProxyError) -> Result<()> {
        self.write_err_packet(err.mysql_code(), err.sql_state(), &err.to_string())
            .await
    }

    pub async fn write_eof_packet(&mut self, status: u16, warnings: u16) -> Result<()> {
        let buf = self.start_ephemeral(5);
        buf.write_u8(EOF_PACKET);
        buf.write_u16(warnings);
        buf.write_u16(status);
        self.write_ephemeral().await
    }

    pub async fn write_auth_switch_request(&mut self, plugin: &str, salt: &[u8]) -> Result<()> {
        let len = 1 + plugin.len() + 1 + salt.len() + 1;
        let buf = self.start_ephemeral(len);
        buf.write_u8(AUTH_SWITCH_HEADER);
        buf.write_null_string(plugin);
        buf.write_bytes(salt);
        buf.write_u8(0);
        self.write_ephemeral().await?;
        self.flush().await
    }

    pub async fn write_auth_more_data(&mut self, value: u8) -> Result<()> {
        let buf = self.start_ephemeral(2);
        buf.write_u8(MORE_DATA_PACKET);
        buf.write_u8(value);
        self.write_ephemeral().await?;
        self.flush().await
    }

    async fn write_column_count(&mut self, count: u64) -> Result<()> {
        let buf = self.start_ephemeral(len_enc_int_size(count));
        buf.write_len_enc_int(count);
        self.write_ephemeral().await
    }

    pub async fn write_column_definition(&mut self, field: &Field) -> Result<()> {
        let len = 4 // len-enc "def"
            + len_enc_string_size(field.schema.as_bytes())
            + len_enc_string_size(field.table.as_bytes())
            + len_enc_string_size(field.org_table.as_bytes())
            + len_enc_string_size(field.name.as_bytes())
            + len_enc_string_size(field.org_name.as_bytes())
            + 1 // length of the fixed-length block
            + 2 // character set
            + 4 // column length
            + 1 // type
            + 2 // flags
            + 1 // decimals
            + 2; // filler
        let buf = self.start_ephemeral(len);
        buf.write_len_enc_string(b"def");
        buf.write_len_enc_string(field.schema.as_bytes());
        buf.write_len_enc_string(field.table.as_bytes());
        buf.write_len_enc_string(field.org_table.as_bytes());
        buf.write_len_enc_string(field.name.as_bytes());
        buf.write_len_enc_string(field.org_name.as_bytes());
        buf.write_u8(0x0c);
        buf.write_u16(field.character_set);
        buf.write_u32(field.column_length);
        buf.write_u8(field.field_type);
        buf.write_u16(field.flags);
        buf.write_u8(field.decimals);
        buf.write_u16(0x0000);
        self.write_ephemeral().await
    }

    async fn write_row(&mut self, row: &[Value]) -> Result<()> {
        let len: usize = row
            .iter()
            .map(|v| {
                if v.is_null() {
                    1
                } else {
                    len_enc_string_size(v.to_bytes())
                }
            })
            .sum();
        let buf = self.start_ephemeral(len);
        for v in row {
            if v.is_null() {
                buf.write_u8(NULL_VALUE);
            } else {
                buf.write_len_enc_string(v.to_bytes());
            }
        }
        self.write_ephemeral().await
    }

    /// Streams a complete text-protocol result set.
    pub async fn write_result_set(&mut self, rs: &ResultSet, status: u16) -> Result<()> {
        self.write_column_count(rs.fields.len() as u64).await?;
        for field in &rs.fields {
            self.write_column_definition(field).await?;
        }
        self.write_eof_packet(status, 0).await?;
        for row in &rs.rows {
            self.write_row(row).await?;
        }
        self.write_eof_packet(status, 0).await?;
        self.flush().await
    }

    /// COM_STMT_PREPARE response: header, then parameter definitions and
    /// column definitions, each block followed by EOF and omitted when
    /// empty.
    pub async fn write_prepare_response(
        &mut self,
        stmt_id: u32,
        params: &[Field],
        columns: &[Field],
        status: u16,
    ) -> Result<()> {
        let buf = self.start_ephemeral(1 + 4 + 2 + 2 + 1 + 2);
        buf.write_u8(0);
        buf.write_u32(stmt_id);
        buf.write_u16(columns.len() as u16);
        buf.write_u16(params.len() as u16);
        buf.write_u8(0);
        buf.write_u16(0); // warnings
        self.write_ephemeral().await?;

        if !params.is_empty() {
            for p in params {
                self.write_column_definition(p).await?;
            }
            self.write_eof_packet(status, 0).await?;
        }
        if !columns.is_empty() {
            for c in columns {
                self.write_column_definition(c).await?;
            }
            self.write_eof_packet(status, 0).await?;
        }
        self.flush().await
    }
}

/// Decodes a COM_STMT_EXECUTE payload (without the command byte) into the
/// statement id and bind variables. `param_count` comes from the prepared
/// statement registry.
pub fn decode_stmt_execute(payload: &[u8], param_count: usize) -> Result<(u32, Vec<BindVariable>)> {
    let mut r = PacketReader::new(payload);
    let stmt_id = r.read_u32()?;
    r.skip(1)?; // flags
    r.skip(4)?; // iteration count, always 1

    if param_count == 0 {
        return Ok((stmt_id, Vec::new()));
    }

    let bitmap_len = (param_count + 7) / 8;
    let null_bitmap = r.read_bytes(bitmap_len)?.to_vec();
    let new_params_bound = r.read_u8()?;

    let mut types = Vec::with_capacity(param_count);
    if new_params_bound == 1 {
        for _ in 0..param_count {
            let code = r.read_u8()?;
            let flags = r.read_u8()?;
            types.push(MySqlType::from_wire_type(code, flags & 0x80 != 0));
        }
    } else {
        return Err(ProxyError::Protocol(
            "rebound statement parameters without types".to_string(),
        ));
    }

    let mut binds = Vec::with_capacity(param_count);
    for (i, &typ) in types.iter().enumerate() {
        if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
            binds.push(BindVariable::null());
            continue;
        }
        let value = read_binary_value(&mut r, typ)?;
        binds.push(BindVariable::from_value(value));
    }
    Ok((stmt_id, binds))
}

fn read_binary_value(r: &mut PacketReader<'_>, typ: MySqlType) -> Result<Value> {
    let value = match typ {
        MySqlType::Null => Value::NULL,
        MySqlType::Int8 => Value::new_int8(r.read_u8()? as i8),
        MySqlType::Uint8 => Value::make_trusted(typ, r.read_u8()?.to_string().into_bytes()),
        MySqlType::Int16 => {
            Value::make_trusted(typ, (r.read_u16()? as i16).to_string().into_bytes())
        }
        MySqlType::Uint16 => Value::make_trusted(typ, r.read_u16()?.to_string().into_bytes()),
        MySqlType::Int32 => {
            Value::make_trusted(typ, (r.read_u32()? as i32).to_string().into_bytes())
        }
        MySqlType::Uint32 => Value::make_trusted(typ, r.read_u32()?.to_string().into_bytes()),
        MySqlType::Int64 => Value::new_int64(r.read_u64()? as i64),
        MySqlType::Uint64 => Value::new_uint64(r.read_u64()?),
        MySqlType::Float32 => {
            Value::new_float32(f32::from_le_bytes(r.read_bytes(4)?.try_into().expect("4 bytes")))
        }
        MySqlType::Float64 => {
            Value::new_float64(f64::from_le_bytes(r.read_bytes(8)?.try_into().expect("8 bytes")))
        }
        MySqlType::Date | MySqlType::Datetime | MySqlType::Timestamp => {
            read_binary_datetime(r, typ)?
        }
        MySqlType::Time => read_binary_time(r)?,
        other => {
            let bytes = r.read_len_enc_string()?.to_vec();
            Value::make_trusted(other, bytes)
        }
    };
    Ok(value)
}

fn read_binary_datetime(r: &mut PacketReader<'_>, typ: MySqlType) -> Result<Value> {
    let len = r.read_u8()?;
    let (mut year, mut month, mut day) = (0u16, 0u8, 0u8);
    let (mut hour, mut minute, mut second) = (0u8, 0u8, 0u8);
    let mut micros = 0u32;
    if len >= 4 {
        year = r.read_u16()?;
        month = r.read_u8()?;
        day = r.read_u8()?;
    }
    if len >= 7 {
        hour = r.read_u8()?;
        minute = r.read_u8()?;
        second = r.read_u8()?;
    }
    if len >= 11 {
        micros = r.read_u32()?;
    }
    let text = if typ == MySqlType::Date {
        format!("{year:04}-{month:02}-{day:02}")
    } else if micros > 0 {
        format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
    } else {
        format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
    };
    Ok(Value::make_trusted(typ, text.into_bytes()))
}

fn read_binary_time(r: &mut PacketReader<'_>) -> Result<Value> {
    let len = r.read_u8()?;
    if len == 0 {
        return Ok(Value::make_trusted(MySqlType::Time, b"00:00:00".to_vec()));
    }
    let negative = r.read_u8()? == 1;
    let days = r.read_u32()?;
    let hour = r.read_u8()?;
    let minute = r.read_u8()?;
    let second = r.read_u8()?;
    let micros = if len >= 12 { r.read_u32()? } else { 0 };
    let total_hours = days * 24 + hour as u32;
    let sign = if negative { "-" } else { "" };
    let text = if micros > 0 {
        format!("{sign}{total_hours:02}:{minute:02}:{second:02}.{micros:06}")
    } else {
        format!("{sign}{total_hours:02}:{minute:02}:{second:02}")
    };
    Ok(Value::make_trusted(MySqlType::Time, text.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(
            Command::parse(&[COM_QUERY, b's', b'e', b'l']).unwrap(),
            Command::Query("sel".to_string())
        );
        assert_eq!(Command::parse(&[COM_PING]).unwrap(), Command::Ping);
        assert_eq!(Command::parse(&[COM_QUIT]).unwrap(), Command::Quit);
        assert_eq!(
            Command::parse(&[COM_STMT_CLOSE, 5, 0, 0, 0]).unwrap(),
            Command::StmtClose(5)
        );
        assert_eq!(Command::parse(&[0x77]).unwrap(), Command::Unknown(0x77));
        assert!(Command::parse(&[]).is_err());
    }

    #[test]
    fn test_decode_stmt_execute_scalar_params() {
        // stmt id 3, no flags, 1 iteration, 2 params: NULL, Int64(7)
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0b0000_0001); // first param null
        payload.push(1); // new params bound
        payload.push(MYSQL_TYPE_LONGLONG);
        payload.push(0);
        payload.push(MYSQL_TYPE_LONGLONG);
        payload.push(0);
        payload.extend_from_slice(&7i64.to_le_bytes());

        let (stmt_id, binds) = decode_stmt_execute(&payload, 2).unwrap();
        assert_eq!(stmt_id, 3);
        assert_eq!(binds.len(), 2);
        assert!(binds[0].is_null());
        assert_eq!(binds[1].to_value().unwrap(), Value::new_int64(7));
    }

    #[test]
    fn test_decode_stmt_execute_string_param() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.push(1);
        payload.push(MYSQL_TYPE_VAR_STRING);
        payload.push(0);
        payload.push(5);
        payload.extend_from_slice(b"hello");

        let (_, binds) = decode_stmt_execute(&payload, 1).unwrap();
        let v = binds[0].to_value().unwrap();
        assert_eq!(v.to_bytes(), b"hello");
        assert!(v.is_quoted());
    }

    #[test]
    fn test_decode_stmt_execute_datetime_param() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.push(1);
        payload.push(MYSQL_TYPE_DATETIME);
        payload.push(0);
        payload.push(7); // length
        payload.extend_from_slice(&2024u16.to_le_bytes());
        payload.push(3);
        payload.push(9);
        payload.push(12);
        payload.push(30);
        payload.push(45);

        let (_, binds) = decode_stmt_execute(&payload, 1).unwrap();
        let v = binds[0].to_value().unwrap();
        assert_eq!(v.to_bytes(), b"2024-03-09 12:30:45");
        assert_eq!(v.value_type(), MySqlType::Datetime);
    }
}
