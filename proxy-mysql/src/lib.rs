// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Server-side MySQL wire protocol and the typed value model
//!
//! Layers, bottom up:
//! - [`types`] / [`value`] / [`bind`]: the `Value` tagged union with MySQL
//!   text-encoding rules and the bind-variable model built on it
//! - [`packet`]: length-encoded primitives and exact-fill packet buffers
//! - [`handshake`] / [`auth`]: protocol V10 handshake and auth plugins
//! - [`conn`] / [`resultset`]: the per-connection packet state machine and
//!   result-set streaming

pub mod auth;
pub mod bind;
pub mod conn;
pub mod constants;
pub mod handshake;
pub mod packet;
pub mod resultset;
pub mod types;
pub mod value;

pub use bind::BindVariable;
pub use conn::{Command, Conn, FlowCounter};
pub use handshake::{HandshakeResponse, InitialHandshake};
pub use resultset::{Field, ResultSet};
pub use types::MySqlType;
pub use value::Value;
