// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Deferred sharding predicates
//!
//! Predicate extraction cannot finish at explain time when bind variables
//! are involved, so the walk produces a condition tree whose leaves hold
//! either literal values or bind slots. [`ConditionTree::evaluate`]
//! consumes the binding map at generation time and yields per-table
//! [`ShardingValues`].

use proxy_catalog::{ShardingValues, ValueRange};
use proxy_common::{ProxyError, Result};
use proxy_mysql::{BindVariable, Value};
use std::collections::BTreeMap;

/// A predicate operand: materialised at explain time or deferred to a bind
/// slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Bind(usize),
}

impl Operand {
    pub fn is_bind(&self) -> bool {
        matches!(self, Operand::Bind(_))
    }

    /// Resolves against the binding map. A list bind yields its elements;
    /// a scalar yields one value.
    pub fn resolve(&self, binds: &[BindVariable]) -> Result<Vec<Value>> {
        match self {
            Operand::Value(v) => Ok(vec![v.clone()]),
            Operand::Bind(index) => {
                let bind = binds.get(*index).ok_or_else(|| {
                    ProxyError::ParseContext(format!("missing bind variable {index}"))
                })?;
                if bind.is_list() {
                    Ok(bind.list_values().to_vec())
                } else {
                    Ok(vec![bind.to_value()?])
                }
            }
        }
    }
}

/// One extracted sharding predicate, keyed by logical table.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq {
        table: String,
        column: String,
        operand: Operand,
    },
    In {
        table: String,
        column: String,
        operands: Vec<Operand>,
    },
    Between {
        table: String,
        column: String,
        low: Operand,
        high: Operand,
    },
}

impl Condition {
    pub fn table(&self) -> &str {
        match self {
            Condition::Eq { table, .. }
            | Condition::In { table, .. }
            | Condition::Between { table, .. } => table,
        }
    }

    fn evaluate(&self, binds: &[BindVariable]) -> Result<ShardingValues> {
        let mut values = ShardingValues::new();
        match self {
            Condition::Eq { column, operand, .. } => {
                for v in operand.resolve(binds)? {
                    values.add_scalar(column, v);
                }
            }
            Condition::In {
                column, operands, ..
            } => {
                let mut elements = Vec::with_capacity(operands.len());
                for operand in operands {
                    elements.extend(operand.resolve(binds)?);
                }
                values.add_in_list(column, elements);
            }
            Condition::Between {
                column, low, high, ..
            } => {
                let low = single(low.resolve(binds)?)?;
                let high = single(high.resolve(binds)?)?;
                values.add_range(column, ValueRange::new(low, high));
            }
        }
        Ok(values)
    }
}

fn single(mut values: Vec<Value>) -> Result<Value> {
    if values.len() != 1 {
        return Err(ProxyError::ParseContext(
            "range bound resolved to a list".to_string(),
        ));
    }
    Ok(values.remove(0))
}

/// Boolean structure over extracted predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    /// No constraint.
    True,
    Leaf(Condition),
    And(Vec<ConditionTree>),
    Or(Vec<ConditionTree>),
    /// A shape that defeats pruning for the named tables.
    Unsupported(Vec<String>),
}

impl ConditionTree {
    pub fn and(children: Vec<ConditionTree>) -> ConditionTree {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                ConditionTree::True => {}
                ConditionTree::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => ConditionTree::True,
            1 => flat.pop().expect("one element"),
            _ => ConditionTree::And(flat),
        }
    }

    pub fn or(children: Vec<ConditionTree>) -> ConditionTree {
        match children.len() {
            0 => ConditionTree::True,
            1 => children.into_iter().next().expect("one element"),
            _ => ConditionTree::Or(children),
        }
    }

    /// True when any leaf operand is a bind slot.
    pub fn has_bind_operands(&self) -> bool {
        match self {
            ConditionTree::True | ConditionTree::Unsupported(_) => false,
            ConditionTree::Leaf(condition) => match condition {
                Condition::Eq { operand, .. } => operand.is_bind(),
                Condition::In { operands, .. } => operands.iter().any(Operand::is_bind),
                Condition::Between { low, high, .. } => low.is_bind() || high.is_bind(),
            },
            ConditionTree::And(children) | ConditionTree::Or(children) => {
                children.iter().any(ConditionTree::has_bind_operands)
            }
        }
    }

    /// Evaluates to per-table sharding values.
    ///
    /// AND intersects same-column value sets; OR unions them, but a branch
    /// that constrains nothing for a table poisons that table's pruning.
    pub fn evaluate(&self, binds: &[BindVariable]) -> Result<BTreeMap<String, ShardingValues>> {
        Ok(match self {
            ConditionTree::True => BTreeMap::new(),
            ConditionTree::Leaf(condition) => {
                let mut map = BTreeMap::new();
                map.insert(condition.table().to_string(), condition.evaluate(binds)?);
                map
            }
            ConditionTree::Unsupported(tables) => tables
                .iter()
                .map(|t| (t.clone(), ShardingValues::unsupported()))
                .collect(),
            ConditionTree::And(children) => {
                let mut merged: BTreeMap<String, ShardingValues> = BTreeMap::new();
                for child in children {
                    for (table, values) in child.evaluate(binds)? {
                        match merged.get_mut(&table) {
                            Some(existing) => existing.intersect_with(values),
                            None => {
                                merged.insert(table, values);
                            }
                        }
                    }
                }
                merged
            }
            ConditionTree::Or(children) => {
                let mut evaluated = Vec::with_capacity(children.len());
                for child in children {
                    evaluated.push(child.evaluate(binds)?);
                }
                let mut merged: BTreeMap<String, ShardingValues> = BTreeMap::new();
                for branch in &evaluated {
                    for table in branch.keys() {
                        merged.entry(table.clone()).or_default();
                    }
                }
                let tables: Vec<String> = merged.keys().cloned().collect();
                for table in tables {
                    let mut acc = ShardingValues::new();
                    let mut poisoned = false;
                    for branch in &evaluated {
                        match branch.get(&table) {
                            Some(values) => acc.union_with(values.clone()),
                            // This branch admits rows from any shard.
                            None => poisoned = true,
                        }
                    }
                    if poisoned {
                        acc = ShardingValues::unsupported();
                    }
                    merged.insert(table, acc);
                }
                merged
            }
        })
    }
}
