// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Configuration management for the proxy
//!
//! A single TOML file carries both the listener settings and the sharding
//! rule table that the catalog is built from.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// MySQL listener port
    pub query_port: u16,

    /// Address to bind the listener on
    pub bind_address: String,

    /// Version string reported in the initial handshake
    pub server_version: String,

    /// Data source used for passthrough statements
    pub default_data_source: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Worker threads for the runtime
    pub worker_threads: usize,

    /// Log level when RUST_LOG is unset
    pub log_level: String,

    /// Account the proxy authenticates; `None` accepts any user
    #[serde(default)]
    pub user: Option<String>,

    /// Cleartext password for `user`; empty means passwordless
    #[serde(default)]
    pub password: Option<String>,

    /// Sharding rules, one per logical schema
    #[serde(default)]
    pub schemas: Vec<ShardingRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingRuleConfig {
    /// Logical schema name as seen by clients
    pub schema: String,

    /// Backend data source names in this schema
    pub data_nodes: Vec<String>,

    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    /// Logical table name
    pub name: String,

    /// Columns the strategy shards on
    pub shard_columns: Vec<String>,

    /// Number of physical tables (`name_0` .. `name_{n-1}`)
    pub shard_count: usize,

    pub strategy: StrategyKind,

    /// Range bounds, required when strategy = "range": upper bound of each
    /// shard's half-open interval, ascending; the last shard is unbounded.
    #[serde(default)]
    pub range_bounds: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Hash,
    Mod,
    Range,
    None,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query_port: 13306,
            bind_address: "0.0.0.0".to_string(),
            server_version: crate::version::SERVER_VERSION.to_string(),
            default_data_source: "ds0".to_string(),
            max_connections: 4096,
            worker_threads: num_cpus::get(),
            log_level: "info".to_string(),
            user: None,
            password: None,
            schemas: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::ProxyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.query_port == 0 {
            return Err(crate::ProxyError::Config(
                "query_port cannot be 0".to_string(),
            ));
        }
        if self.default_data_source.is_empty() {
            return Err(crate::ProxyError::Config(
                "default_data_source cannot be empty".to_string(),
            ));
        }
        for schema in &self.schemas {
            if schema.data_nodes.is_empty() {
                return Err(crate::ProxyError::Config(format!(
                    "schema {} has no data nodes",
                    schema.schema
                )));
            }
            for table in &schema.tables {
                if table.shard_count == 0 {
                    return Err(crate::ProxyError::Config(format!(
                        "table {}.{} has shard_count 0",
                        schema.schema, table.name
                    )));
                }
                if table.strategy == StrategyKind::Range
                    && table.range_bounds.len() + 1 != table.shard_count
                {
                    return Err(crate::ProxyError::Config(format!(
                        "table {}.{} needs {} range bounds",
                        schema.schema,
                        table.name,
                        table.shard_count - 1
                    )));
                }
            }
        }
        Ok(())
    }
}
