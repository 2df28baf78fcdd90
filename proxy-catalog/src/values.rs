// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Extracted sharding values
//!
//! Per-table container filled by predicate extraction. `scalar_values`
//! drives strategy evaluation; `in_values` additionally remembers the
//! original IN-list elements per column so the rewriter can partition
//! them per shard. `has_unsupported` forces full fan-out.

use proxy_mysql::Value;
use std::collections::{BTreeMap, BTreeSet};

/// An inclusive range extracted from `BETWEEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub lower: Value,
    pub upper: Value,
}

impl ValueRange {
    pub fn new(lower: Value, upper: Value) -> ValueRange {
        ValueRange { lower, upper }
    }

    /// Intersection of two inclusive integer ranges; `None` when disjoint
    /// or not integral.
    pub fn intersect(&self, other: &ValueRange) -> Option<ValueRange> {
        let (a_lo, a_hi) = (self.lower.to_i64().ok()?, self.upper.to_i64().ok()?);
        let (b_lo, b_hi) = (other.lower.to_i64().ok()?, other.upper.to_i64().ok()?);
        let lo = a_lo.max(b_lo);
        let hi = a_hi.min(b_hi);
        if lo > hi {
            return None;
        }
        Some(ValueRange::new(Value::new_int64(lo), Value::new_int64(hi)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardingValues {
    pub scalar_values: BTreeMap<String, BTreeSet<Value>>,
    pub range_values: BTreeMap<String, Vec<ValueRange>>,
    pub in_values: BTreeMap<String, Vec<Value>>,
    pub has_unsupported: bool,
}

impl ShardingValues {
    pub fn new() -> ShardingValues {
        ShardingValues::default()
    }

    pub fn unsupported() -> ShardingValues {
        ShardingValues {
            has_unsupported: true,
            ..ShardingValues::default()
        }
    }

    pub fn add_scalar(&mut self, column: &str, value: Value) {
        self.scalar_values
            .entry(column.to_string())
            .or_default()
            .insert(value);
    }

    pub fn add_in_list(&mut self, column: &str, values: Vec<Value>) {
        for v in &values {
            self.add_scalar(column, v.clone());
        }
        self.in_values
            .entry(column.to_string())
            .or_default()
            .extend(values);
    }

    pub fn add_range(&mut self, column: &str, range: ValueRange) {
        self.range_values
            .entry(column.to_string())
            .or_default()
            .push(range);
    }

    /// True when nothing was extracted and nothing was rejected.
    pub fn is_empty(&self) -> bool {
        !self.has_unsupported
            && self.scalar_values.values().all(|s| s.is_empty())
            && self.range_values.values().all(|r| r.is_empty())
    }

    pub fn scalars_of(&self, column: &str) -> Option<&BTreeSet<Value>> {
        self.scalar_values.get(column).filter(|s| !s.is_empty())
    }

    pub fn ranges_of(&self, column: &str) -> Option<&[ValueRange]> {
        self.range_values
            .get(column)
            .map(|r| r.as_slice())
            .filter(|r| !r.is_empty())
    }

    /// OR composition: value sets union; an unsupported branch poisons the
    /// whole disjunction.
    pub fn union_with(&mut self, other: ShardingValues) {
        self.has_unsupported |= other.has_unsupported;
        for (column, values) in other.scalar_values {
            self.scalar_values.entry(column).or_default().extend(values);
        }
        for (column, ranges) in other.range_values {
            self.range_values.entry(column).or_default().extend(ranges);
        }
        for (column, values) in other.in_values {
            self.in_values.entry(column).or_default().extend(values);
        }
    }

    /// AND composition: same-column scalar sets intersect, same-column
    /// ranges intersect pairwise, disjoint columns accumulate. An
    /// intersection that empties out leaves the column without pruning
    /// information rather than inventing an impossible shard set.
    pub fn intersect_with(&mut self, other: ShardingValues) {
        self.has_unsupported |= other.has_unsupported;
        for (column, values) in other.scalar_values {
            match self.scalar_values.get_mut(&column) {
                Some(existing) if !existing.is_empty() => {
                    let intersection: BTreeSet<Value> =
                        existing.intersection(&values).cloned().collect();
                    if intersection.is_empty() {
                        self.scalar_values.remove(&column);
                    } else {
                        *existing = intersection;
                    }
                }
                _ => {
                    self.scalar_values.insert(column, values);
                }
            }
        }
        for (column, ranges) in other.range_values {
            match self.range_values.get_mut(&column) {
                Some(existing) if !existing.is_empty() => {
                    let mut merged = Vec::new();
                    for a in existing.iter() {
                        for b in &ranges {
                            if let Some(r) = a.intersect(b) {
                                merged.push(r);
                            }
                        }
                    }
                    if merged.is_empty() {
                        self.range_values.remove(&column);
                    } else {
                        *existing = merged;
                    }
                }
                _ => {
                    self.range_values.insert(column, ranges);
                }
            }
        }
        for (column, values) in other.in_values {
            self.in_values.entry(column).or_default().extend(values);
        }
    }
}
