// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Sharding table descriptor
//!
//! A logical table maps onto `shard_count` physical tables spread
//! round-robin across the schema's data nodes: physical table `i` lives on
//! `data_nodes[i % n]`. The database strategy prunes data sources first,
//! then the table strategy prunes physical tables within each survivor.

use crate::strategy::ShardingStrategy;
use crate::values::ShardingValues;
use proxy_common::config::{StrategyKind, TableRuleConfig};

/// One physical shard: a table on a data source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardCoord {
    pub data_source: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct ShardingTable {
    pub schema: String,
    pub logical_name: String,
    pub shard_columns: Vec<String>,
    pub data_nodes: Vec<String>,
    pub database_strategy: ShardingStrategy,
    pub table_strategy: ShardingStrategy,
    physical_tables: Vec<String>,
}

impl ShardingTable {
    pub fn from_rule(schema: &str, rule: &TableRuleConfig, data_nodes: &[String]) -> ShardingTable {
        let physical_tables = (0..rule.shard_count)
            .map(|i| format!("{}_{i}", rule.name))
            .collect();
        let table_strategy = match rule.strategy {
            StrategyKind::Hash => ShardingStrategy::Hash {
                shard_columns: rule.shard_columns.clone(),
            },
            StrategyKind::Mod => ShardingStrategy::Mod {
                shard_columns: rule.shard_columns.clone(),
            },
            StrategyKind::Range => ShardingStrategy::Range {
                shard_columns: rule.shard_columns.clone(),
                bounds: rule.range_bounds.clone(),
            },
            StrategyKind::None => ShardingStrategy::None,
        };
        ShardingTable {
            schema: schema.to_string(),
            logical_name: rule.name.clone(),
            shard_columns: rule.shard_columns.clone(),
            data_nodes: data_nodes.to_vec(),
            database_strategy: ShardingStrategy::None,
            table_strategy,
            physical_tables,
        }
    }

    pub fn physical_tables(&self) -> &[String] {
        &self.physical_tables
    }

    /// The data source hosting a physical table.
    pub fn data_node_of(&self, physical_table: &str) -> Option<&str> {
        let index = self
            .physical_tables
            .iter()
            .position(|t| t == physical_table)?;
        Some(&self.data_nodes[index % self.data_nodes.len()])
    }

    /// True when `column` participates in either strategy.
    pub fn is_shard_column(&self, column: &str) -> bool {
        self.table_strategy
            .shard_columns()
            .iter()
            .chain(self.database_strategy.shard_columns())
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Resolves the covering shard set, sorted by `(data_source, table)`.
    /// `None` or empty values mean broadcast.
    pub fn resolve_shards(&self, values: Option<&ShardingValues>) -> Vec<ShardCoord> {
        let empty = ShardingValues::new();
        let values = values.unwrap_or(&empty);

        let surviving_nodes = self.database_strategy.shard(&self.data_nodes, values);
        let surviving_tables = self.table_strategy.shard(&self.physical_tables, values);

        let mut coords: Vec<ShardCoord> = surviving_tables
            .into_iter()
            .filter_map(|table| {
                let node = self.data_node_of(&table)?;
                if !surviving_nodes.iter().any(|n| n == node) {
                    return None;
                }
                Some(ShardCoord {
                    data_source: node.to_string(),
                    table,
                })
            })
            .collect();
        coords.sort();
        coords
    }
}
