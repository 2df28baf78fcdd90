// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Sharding strategies
//!
//! A closed set of strategies behind one enum, so callers can reason about
//! supported predicate shapes without open dispatch. Every strategy obeys
//! the pruning contract: an unsupported predicate shape returns the full
//! candidate set, and adding predicates never grows the result.

use crate::values::ShardingValues;
use proxy_mysql::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum ShardingStrategy {
    /// CRC32 of the value text, modulo the candidate count.
    Hash { shard_columns: Vec<String> },
    /// Integral value modulo the candidate count.
    Mod { shard_columns: Vec<String> },
    /// Ordered bound table; candidate `i` covers values up to `bounds[i]`
    /// exclusive, the last candidate is unbounded.
    Range {
        shard_columns: Vec<String>,
        bounds: Vec<i64>,
    },
    /// Broadcast: prunes nothing, exposes no columns.
    None,
}

impl ShardingStrategy {
    pub fn shard_columns(&self) -> &[String] {
        match self {
            ShardingStrategy::Hash { shard_columns }
            | ShardingStrategy::Mod { shard_columns }
            | ShardingStrategy::Range { shard_columns, .. } => shard_columns,
            ShardingStrategy::None => &[],
        }
    }

    pub fn supports_scalar(&self) -> bool {
        !matches!(self, ShardingStrategy::None)
    }

    pub fn supports_range(&self) -> bool {
        matches!(self, ShardingStrategy::Range { .. })
    }

    /// Selects the covering subset of `candidates` for the extracted
    /// values. Candidate order is preserved.
    pub fn shard(&self, candidates: &[String], values: &ShardingValues) -> Vec<String> {
        if candidates.is_empty() || values.has_unsupported {
            return candidates.to_vec();
        }

        let mut selected: BTreeSet<usize> = BTreeSet::new();
        let mut pruned = false;

        for column in self.shard_columns() {
            let mut column_indexes: BTreeSet<usize> = BTreeSet::new();
            let mut column_pruned = false;

            if self.supports_scalar() {
                if let Some(scalars) = values.scalars_of(column) {
                    for value in scalars {
                        match self.index_of(value, candidates.len()) {
                            Some(index) => {
                                column_indexes.insert(index);
                            }
                            // A value the strategy cannot place contributes
                            // no pruning for this predicate.
                            None => {
                                column_pruned = false;
                                column_indexes.clear();
                                break;
                            }
                        }
                        column_pruned = true;
                    }
                }
            }
            if self.supports_range() {
                if let Some(ranges) = values.ranges_of(column) {
                    for range in ranges {
                        match self.indexes_of_range(range.lower.clone(), range.upper.clone(), candidates.len())
                        {
                            Some(indexes) => {
                                column_indexes.extend(indexes);
                                column_pruned = true;
                            }
                            None => {
                                column_pruned = false;
                                column_indexes.clear();
                                break;
                            }
                        }
                    }
                }
            }

            if column_pruned {
                if pruned {
                    // Columns compose conjunctively.
                    selected = selected.intersection(&column_indexes).copied().collect();
                } else {
                    selected = column_indexes;
                    pruned = true;
                }
            }
        }

        if !pruned {
            return candidates.to_vec();
        }
        selected
            .into_iter()
            .map(|i| candidates[i].clone())
            .collect()
    }

    fn index_of(&self, value: &Value, candidate_count: usize) -> Option<usize> {
        match self {
            ShardingStrategy::Mod { .. } => {
                let v = value.to_i64().ok()?;
                Some(v.rem_euclid(candidate_count as i64) as usize)
            }
            ShardingStrategy::Hash { .. } => {
                let checksum = crc32fast::hash(value.to_bytes()) as u64;
                Some((checksum % candidate_count as u64) as usize)
            }
            ShardingStrategy::Range { bounds, .. } => {
                let v = value.to_i64().ok()?;
                Some(range_index(bounds, v, candidate_count))
            }
            ShardingStrategy::None => None,
        }
    }

    fn indexes_of_range(
        &self,
        lower: Value,
        upper: Value,
        candidate_count: usize,
    ) -> Option<Vec<usize>> {
        match self {
            ShardingStrategy::Range { bounds, .. } => {
                let lo = lower.to_i64().ok()?;
                let hi = upper.to_i64().ok()?;
                if lo > hi {
                    return Some(Vec::new());
                }
                let first = range_index(bounds, lo, candidate_count);
                let last = range_index(bounds, hi, candidate_count);
                Some((first..=last).collect())
            }
            _ => None,
        }
    }
}

fn range_index(bounds: &[i64], value: i64, candidate_count: usize) -> usize {
    for (i, &bound) in bounds.iter().enumerate() {
        if value < bound {
            return i;
        }
    }
    candidate_count.saturating_sub(1)
}
