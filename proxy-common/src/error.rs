// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Error types for the sharding proxy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Wire-level protocol violation. The connection is reset.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failure, reported to the client as ERR 1045.
    #[error("Access denied for user '{0}'")]
    Auth(String),

    /// Bad AST shape encountered during explain, reported as ERR 1064.
    #[error("Parse error: {0}")]
    ParseContext(String),

    /// Predicate shape that cannot be pushed down. The query still runs
    /// by full fan-out; this variant is only surfaced when a caller asked
    /// for strict routing.
    #[error("Sharding does not support predicate: {0}")]
    ShardingUnsupported(String),

    /// Value conversion between incompatible types.
    #[error("Cannot convert value to desired type")]
    IncompatibleCast,

    /// Invalid type passed to a value constructor.
    #[error("Invalid type specified for value: {0}")]
    InvalidType(String),

    /// A shard would receive an empty IN list; the generator skips it.
    #[error("IN list is empty for shard {0}")]
    EmptyInList(String),

    /// Backend dispatch failed; the backend's ERR code is surfaced.
    #[error("Backend {data_source} failed: {message}")]
    BackendFailure {
        data_source: String,
        code: u16,
        message: String,
    },

    /// Client is gone; outstanding scatter work is dropped silently.
    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// MySQL error code used when this error is written as an ERR packet.
    pub fn mysql_code(&self) -> u16 {
        match self {
            ProxyError::Auth(_) => 1045,
            ProxyError::ParseContext(_) => 1064,
            ProxyError::BackendFailure { code, .. } => *code,
            ProxyError::ShardingUnsupported(_) => 1235,
            _ => 1105,
        }
    }

    /// SQL state paired with `mysql_code` in ERR packets.
    pub fn sql_state(&self) -> &'static str {
        match self {
            ProxyError::Auth(_) => "28000",
            ProxyError::ParseContext(_) => "42000",
            _ => "HY000",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
