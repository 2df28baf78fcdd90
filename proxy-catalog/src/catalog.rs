// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Catalog snapshots
//!
//! Readers call [`Catalog::snapshot`] once per statement and resolve every
//! table against that handle; a concurrent reload swaps the inner `Arc`
//! without disturbing in-flight statements.

use crate::table::ShardingTable;
use parking_lot::RwLock;
use proxy_common::{Config, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// (schema, table) -> descriptor; keys lowercased.
    tables: HashMap<(String, String), Arc<ShardingTable>>,
    /// schema -> data nodes, for passthrough routing decisions.
    schemas: HashMap<String, Vec<String>>,
}

impl CatalogSnapshot {
    pub fn from_config(config: &Config) -> Result<CatalogSnapshot> {
        let mut snapshot = CatalogSnapshot::default();
        for schema in &config.schemas {
            snapshot
                .schemas
                .insert(schema.schema.to_lowercase(), schema.data_nodes.clone());
            for rule in &schema.tables {
                let table = ShardingTable::from_rule(&schema.schema, rule, &schema.data_nodes);
                snapshot.tables.insert(
                    (schema.schema.to_lowercase(), rule.name.to_lowercase()),
                    Arc::new(table),
                );
            }
        }
        Ok(snapshot)
    }

    pub fn lookup(&self, schema: &str, table: &str) -> Option<Arc<ShardingTable>> {
        self.tables
            .get(&(schema.to_lowercase(), table.to_lowercase()))
            .cloned()
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains_key(&schema.to_lowercase())
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

pub struct Catalog {
    inner: RwLock<Arc<CatalogSnapshot>>,
}

impl Catalog {
    pub fn from_config(config: &Config) -> Result<Catalog> {
        let snapshot = CatalogSnapshot::from_config(config)?;
        info!(tables = snapshot.table_count(), "catalog loaded");
        Ok(Catalog {
            inner: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.inner.read().clone()
    }

    /// Swaps in a snapshot rebuilt from `config`. Existing readers keep
    /// their old snapshot.
    pub fn reload(&self, config: &Config) -> Result<()> {
        let snapshot = CatalogSnapshot::from_config(config)?;
        info!(tables = snapshot.table_count(), "catalog reloaded");
        *self.inner.write() = Arc::new(snapshot);
        Ok(())
    }
}
