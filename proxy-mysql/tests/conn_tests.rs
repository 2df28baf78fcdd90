// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Wire-level tests for the connection packet machinery, driven through an
//! in-memory duplex stream.

use proxy_mysql::constants::*;
use proxy_mysql::packet::PacketReader;
use proxy_mysql::resultset::{Field, ResultSet};
use proxy_mysql::{Conn, FlowCounter, HandshakeResponse, InitialHandshake, MySqlType, Value};
use tokio::io::AsyncReadExt;

async fn read_raw_packet<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.unwrap();
    (header[3], payload)
}

#[tokio::test]
async fn test_ok_packet_layout() {
    let (server_side, mut client_side) = tokio::io::duplex(1024);
    let mut conn = Conn::new(server_side, FlowCounter::new());
    conn.write_ok_packet(3, 11, SERVER_STATUS_AUTOCOMMIT, 1)
        .await
        .unwrap();

    let (seq, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(seq, 0);
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_u8().unwrap(), OK_PACKET);
    assert_eq!(r.read_len_enc_int().unwrap(), 3); // affected rows
    assert_eq!(r.read_len_enc_int().unwrap(), 11); // last insert id
    assert_eq!(r.read_u16().unwrap(), SERVER_STATUS_AUTOCOMMIT);
    assert_eq!(r.read_u16().unwrap(), 1); // warnings
    assert_eq!(r.remaining(), 0);
}

#[tokio::test]
async fn test_err_packet_layout() {
    let (server_side, mut client_side) = tokio::io::duplex(1024);
    let mut conn = Conn::new(server_side, FlowCounter::new());
    conn.write_err_packet(1064, "42000", "Syntax error")
        .await
        .unwrap();

    let (_, payload) = read_raw_packet(&mut client_side).await;
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_u8().unwrap(), ERR_PACKET);
    assert_eq!(r.read_u16().unwrap(), 1064);
    assert_eq!(r.read_u8().unwrap(), b'#');
    assert_eq!(r.read_bytes(5).unwrap(), b"42000");
    assert_eq!(r.read_eof_bytes(), b"Syntax error");
}

#[tokio::test]
async fn test_result_set_stream() {
    let (server_side, mut client_side) = tokio::io::duplex(8192);
    let mut conn = Conn::new(server_side, FlowCounter::new());

    let mut rs = ResultSet::new(vec![
        Field::new("id", MySqlType::Int64),
        Field::new("name", MySqlType::VarChar),
    ]);
    rs.add_row(vec![Value::new_int64(1), Value::new_varchar("alice")]);
    rs.add_row(vec![Value::new_int64(2), Value::NULL]);
    conn.write_result_set(&rs, SERVER_STATUS_AUTOCOMMIT)
        .await
        .unwrap();

    // Column count.
    let (seq, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(seq, 0);
    assert_eq!(payload, vec![2]);

    // Two column definitions; layout checked on the first.
    let (_, payload) = read_raw_packet(&mut client_side).await;
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_len_enc_string().unwrap(), b"def");
    assert_eq!(r.read_len_enc_string().unwrap(), b""); // schema
    assert_eq!(r.read_len_enc_string().unwrap(), b""); // table
    assert_eq!(r.read_len_enc_string().unwrap(), b""); // org_table
    assert_eq!(r.read_len_enc_string().unwrap(), b"id");
    assert_eq!(r.read_len_enc_string().unwrap(), b"id");
    assert_eq!(r.read_u8().unwrap(), 0x0c);
    r.skip(2).unwrap(); // charset
    r.skip(4).unwrap(); // column length
    assert_eq!(r.read_u8().unwrap(), MYSQL_TYPE_LONGLONG);
    r.skip(2).unwrap(); // flags
    r.skip(1).unwrap(); // decimals
    assert_eq!(r.read_u16().unwrap(), 0);
    assert_eq!(r.remaining(), 0);
    let _ = read_raw_packet(&mut client_side).await;

    // EOF after columns.
    let (_, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(payload[0], EOF_PACKET);

    // First row.
    let (_, payload) = read_raw_packet(&mut client_side).await;
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_len_enc_string().unwrap(), b"1");
    assert_eq!(r.read_len_enc_string().unwrap(), b"alice");

    // Second row: NULL is the single byte 0xFB.
    let (_, payload) = read_raw_packet(&mut client_side).await;
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_len_enc_string().unwrap(), b"2");
    assert_eq!(r.read_u8().unwrap(), NULL_VALUE);
    assert_eq!(r.remaining(), 0);

    // Trailing EOF.
    let (seq, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(payload[0], EOF_PACKET);
    assert_eq!(seq, 6);
}

#[tokio::test]
async fn test_prepare_response_blocks() {
    let (server_side, mut client_side) = tokio::io::duplex(8192);
    let mut conn = Conn::new(server_side, FlowCounter::new());

    let params = vec![Field::parameter(), Field::parameter()];
    let columns = vec![Field::new("id", MySqlType::Int64)];
    conn.write_prepare_response(7, &params, &columns, SERVER_STATUS_AUTOCOMMIT)
        .await
        .unwrap();

    let (_, payload) = read_raw_packet(&mut client_side).await;
    let mut r = PacketReader::new(&payload);
    assert_eq!(r.read_u8().unwrap(), 0); // status
    assert_eq!(r.read_u32().unwrap(), 7); // statement id
    assert_eq!(r.read_u16().unwrap(), 1); // columns
    assert_eq!(r.read_u16().unwrap(), 2); // params
    assert_eq!(r.read_u8().unwrap(), 0); // filler
    assert_eq!(r.read_u16().unwrap(), 0); // warnings
    assert_eq!(r.remaining(), 0);

    // Two parameter definitions + EOF.
    let _ = read_raw_packet(&mut client_side).await;
    let _ = read_raw_packet(&mut client_side).await;
    let (_, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(payload[0], EOF_PACKET);

    // One column definition + EOF.
    let _ = read_raw_packet(&mut client_side).await;
    let (_, payload) = read_raw_packet(&mut client_side).await;
    assert_eq!(payload[0], EOF_PACKET);
}

#[tokio::test]
async fn test_sequence_wraps_and_resets() {
    let (server_side, mut client_side) = tokio::io::duplex(1 << 16);
    let mut conn = Conn::new(server_side, FlowCounter::new());

    for _ in 0..300 {
        conn.write_packet(&[0x00]).await.unwrap();
    }
    conn.flush().await.unwrap();
    let mut last_seq = 0;
    for _ in 0..300 {
        let (seq, _) = read_raw_packet(&mut client_side).await;
        last_seq = seq;
    }
    // 300 packets wrap the 8-bit sequence.
    assert_eq!(last_seq, ((300u32 - 1) % 256) as u8);

    conn.reset_sequence();
    conn.write_packet(&[0x00]).await.unwrap();
    conn.flush().await.unwrap();
    let (seq, _) = read_raw_packet(&mut client_side).await;
    assert_eq!(seq, 0);
}

#[test]
fn test_handshake_fields_reconstructed() {
    // Server side: version 5.7.0-sharding, connection id 0x01020304,
    // salt bytes 0..19.
    let mut handshake = InitialHandshake::new(0x01020304, "5.7.0-sharding");
    handshake.salt = std::array::from_fn(|i| i as u8);
    let payload = handshake.to_payload().unwrap();

    let parsed = InitialHandshake::parse(&payload).unwrap();
    assert_eq!(parsed.server_version, "5.7.0-sharding");
    assert_eq!(parsed.connection_id, 0x01020304);
    assert_eq!(parsed.salt, std::array::from_fn::<u8, 20, _>(|i| i as u8));

    // Client side: capabilities 0x81BEA605, user root,
    // mysql_native_password.
    let response = HandshakeResponse {
        capability_flags: 0x81BEA605,
        max_packet_size: 1 << 24,
        character_set: UTF8MB4_GENERAL_CI,
        username: "root".to_string(),
        auth_response: (0..20).collect(),
        database: None,
        auth_plugin_name: Some(AUTH_NATIVE_PASSWORD.to_string()),
    };
    let parsed = HandshakeResponse::parse(&response.to_payload()).unwrap();
    assert_eq!(parsed.capability_flags, 0x81BEA605);
    assert_eq!(parsed.username, "root");
    assert_eq!(parsed.auth_response, (0..20).collect::<Vec<u8>>());
    assert_eq!(
        parsed.auth_plugin_name.as_deref(),
        Some(AUTH_NATIVE_PASSWORD)
    );
    assert_eq!(parsed.database, None);
}
