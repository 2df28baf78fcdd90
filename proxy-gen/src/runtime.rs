// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The destination cursor
//!
//! A `GenRuntime` borrows the explain for the duration of iteration. Each
//! sharded table contributes its resolved `(data_source, physical_table)`
//! coordinates, sorted; `next()` advances the combined cursor in
//! lexicographic order and stays exhausted once it completes. IN-list
//! partitions and per-shard bind rebinding are computed up front.

use proxy_catalog::{ShardCoord, ShardingValues};
use proxy_explain::{ShardCursor, SqlExplain};
use proxy_mysql::{BindVariable, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

struct TableCursor {
    logical: String,
    coords: Vec<ShardCoord>,
    index: usize,
}

pub struct GenRuntime<'a> {
    explain: &'a SqlExplain,
    default_data_source: String,
    binds: Vec<BindVariable>,
    tables: Vec<TableCursor>,
    started: bool,
    finished: bool,
    /// (logical, column) -> per-coordinate IN-list slice. Outer presence
    /// means the predicate was partitioned at all.
    partitions: HashMap<(String, String), HashMap<ShardCoord, Vec<Value>>>,
    consumed_slots: BTreeSet<usize>,
}

impl<'a> GenRuntime<'a> {
    pub fn new(
        default_data_source: &str,
        explain: &'a SqlExplain,
        values: &BTreeMap<String, ShardingValues>,
        binds: &[BindVariable],
    ) -> GenRuntime<'a> {
        let mut tables = Vec::new();
        for descriptor in explain.sharded_tables() {
            let table_values = values.get(&descriptor.logical_name);
            let mut coords = descriptor.resolve_shards(table_values);
            if coords.is_empty() {
                coords = descriptor.resolve_shards(None);
            }
            tables.push(TableCursor {
                logical: descriptor.logical_name.clone(),
                coords,
                index: 0,
            });
        }

        let mut partitions: HashMap<(String, String), HashMap<ShardCoord, Vec<Value>>> =
            HashMap::new();
        let mut consumed_slots = BTreeSet::new();
        for rewrite in explain.in_rewrites() {
            let Some(descriptor) = explain.descriptor_of(&rewrite.logical) else {
                continue;
            };
            let Some(table_values) = values.get(&rewrite.logical) else {
                continue;
            };
            if table_values.has_unsupported {
                continue;
            }
            let Some(elements) = table_values.in_values.get(&rewrite.column) else {
                continue;
            };
            if elements.is_empty() {
                continue;
            }
            let entry = partitions
                .entry((rewrite.logical.clone(), rewrite.column.clone()))
                .or_default();
            for element in elements {
                let mut singleton = ShardingValues::new();
                singleton.add_scalar(&rewrite.column, element.clone());
                for coord in descriptor.resolve_shards(Some(&singleton)) {
                    entry.entry(coord).or_default().push(element.clone());
                }
            }
            consumed_slots.extend(rewrite.bind_slots.iter().copied());
        }

        GenRuntime {
            explain,
            default_data_source: default_data_source.to_string(),
            binds: binds.to_vec(),
            tables,
            started: false,
            finished: false,
            partitions,
            consumed_slots,
        }
    }

    pub fn explain(&self) -> &SqlExplain {
        self.explain
    }

    /// Advances to the next coordinate combination. Returns `false` once
    /// exhausted, and keeps returning `false` thereafter.
    pub fn next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.tables.is_empty() {
            self.finished = true;
            return false;
        }
        if !self.started {
            self.started = true;
            return true;
        }
        // Odometer: the last table spins fastest, so the first table's
        // data source is non-decreasing across the run.
        for cursor in self.tables.iter_mut().rev() {
            cursor.index += 1;
            if cursor.index < cursor.coords.len() {
                return true;
            }
            cursor.index = 0;
        }
        self.finished = true;
        false
    }

    fn current_coord(&self, logical: &str) -> Option<&ShardCoord> {
        self.tables
            .iter()
            .find(|t| t.logical.eq_ignore_ascii_case(logical))
            .map(|t| &t.coords[t.index])
    }

    /// Bind variables for the current shard: binds consumed by a
    /// materialised IN partition drop out, the rest pass through.
    pub fn current_bind_variables(&self) -> Vec<BindVariable> {
        self.binds
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.consumed_slots.contains(i))
            .map(|(_, bind)| bind.clone())
            .collect()
    }
}

impl ShardCursor for GenRuntime<'_> {
    fn current_data_source(&self) -> &str {
        self.tables
            .first()
            .map(|t| t.coords[t.index].data_source.as_str())
            .unwrap_or(&self.default_data_source)
    }

    fn default_data_source(&self) -> &str {
        &self.default_data_source
    }

    fn physical_table(&self, logical_table: &str) -> Option<&str> {
        self.current_coord(logical_table).map(|c| c.table.as_str())
    }

    fn in_values(&self, logical_table: &str, column: &str) -> Option<&[Value]> {
        let per_coord = self
            .partitions
            .get(&(logical_table.to_string(), column.to_string()))?;
        let coord = self.current_coord(logical_table)?;
        Some(
            per_coord
                .get(coord)
                .map(|values| values.as_slice())
                .unwrap_or(&[]),
        )
    }
}
