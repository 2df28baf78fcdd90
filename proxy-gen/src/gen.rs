// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Scatter command generation

use crate::runtime::GenRuntime;
use proxy_common::{ProxyError, Result};
use proxy_explain::{ShardCursor, SqlExplain};
use proxy_mysql::BindVariable;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlGenUsage {
    /// No sharded table involved: the original SQL goes to the default
    /// data source unchanged.
    Raw,
    Shard,
}

/// One `(data_source, sql, bind_vars)` tuple of the fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterCommand {
    pub data_source: String,
    pub sql: String,
    pub bind_vars: Vec<BindVariable>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlGenResult {
    pub usage: SqlGenUsage,
    pub commands: Vec<ScatterCommand>,
}

/// Restores sharding values from the bind variables, then walks the
/// destination cursor rendering one command per shard. Commands come out
/// in lexicographic `(data_source, table_index, physical_table)` order; a
/// shard whose IN partition is empty is skipped rather than sent invalid
/// SQL.
pub fn generate_sql(
    default_data_source: &str,
    explain: &SqlExplain,
    binds: &[BindVariable],
) -> Result<SqlGenResult> {
    let values = explain.restore_sharding_values(binds)?;
    if values.is_empty() {
        return Ok(SqlGenResult {
            usage: SqlGenUsage::Raw,
            commands: Vec::new(),
        });
    }

    let mut runtime = GenRuntime::new(default_data_source, explain, &values, binds);
    let mut commands = Vec::new();
    while runtime.next() {
        let sql = match explain.restore_sql(&runtime) {
            Ok(sql) => sql,
            Err(ProxyError::EmptyInList(shard)) => {
                debug!(%shard, "skipping shard with empty IN partition");
                continue;
            }
            Err(e) => return Err(e),
        };
        commands.push(ScatterCommand {
            data_source: runtime.current_data_source().to_string(),
            sql,
            bind_vars: runtime.current_bind_variables(),
        });
    }
    Ok(SqlGenResult {
        usage: SqlGenUsage::Shard,
        commands,
    })
}
