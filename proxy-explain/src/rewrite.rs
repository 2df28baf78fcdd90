// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Per-shard writers
//!
//! Each writer renders one bound AST node for the cursor's current shard:
//! table names become physical names (schema-qualified off the default
//! data source), column qualifiers follow, IN lists shrink to the elements
//! routable to the shard, BETWEEN bounds clamp to a range shard's domain,
//! and LIMIT folds the offset into the count. Writers hold no state; they
//! are replayed once per iteration.

use crate::context::ShardCursor;
use crate::explain::{RewriteOp, SqlExplain};
use proxy_analysis::{Arena, Node, NodeId, NodeRewriter};
use proxy_catalog::ShardingStrategy;
use proxy_common::{ProxyError, Result};
use proxy_mysql::Value;

pub(crate) struct ExplainRewriter<'a> {
    pub explain: &'a SqlExplain,
    pub cursor: &'a dyn ShardCursor,
}

impl NodeRewriter for ExplainRewriter<'_> {
    fn rewrite_node(&self, id: NodeId, arena: &Arena, out: &mut String) -> Result<bool> {
        let Some(op) = self.explain.rewrite_op(id) else {
            return Ok(false);
        };
        match op {
            RewriteOp::Table { logical } => self.write_table(id, arena, logical, out),
            RewriteOp::Column { logical } => self.write_column(id, arena, logical, out),
            RewriteOp::In {
                logical, column, ..
            } => self.write_pattern_in(id, arena, logical, column, out),
            RewriteOp::Between { logical, .. } => self.write_between(id, arena, logical, out),
            RewriteOp::Limit => {
                let lookup = self.explain.limit_lookup();
                out.push_str("LIMIT 0, ");
                out.push_str(&(lookup.offset + lookup.count).to_string());
                Ok(true)
            }
        }
    }
}

impl ExplainRewriter<'_> {
    fn write_table(
        &self,
        id: NodeId,
        arena: &Arena,
        logical: &str,
        out: &mut String,
    ) -> Result<bool> {
        let Node::TableSource(table) = arena.node(id) else {
            return Ok(false);
        };
        let Some(physical) = self.cursor.physical_table(logical) else {
            return Ok(false);
        };
        if self.cursor.current_data_source() != self.cursor.default_data_source() {
            out.push_str(self.cursor.current_data_source());
            out.push('.');
        }
        out.push_str(physical);
        if let Some(alias) = &table.alias {
            out.push(' ');
            out.push_str(alias);
        }
        Ok(true)
    }

    fn write_column(
        &self,
        id: NodeId,
        arena: &Arena,
        logical: &str,
        out: &mut String,
    ) -> Result<bool> {
        let Node::ColumnName(column) = arena.node(id) else {
            return Ok(false);
        };
        let Some(physical) = self.cursor.physical_table(logical) else {
            return Ok(false);
        };
        out.push_str(physical);
        out.push('.');
        out.push_str(&column.column);
        Ok(true)
    }

    fn write_pattern_in(
        &self,
        id: NodeId,
        arena: &Arena,
        logical: &str,
        column: &str,
        out: &mut String,
    ) -> Result<bool> {
        let Node::PatternIn(pattern) = arena.node(id) else {
            return Ok(false);
        };
        let Some(values) = self.cursor.in_values(logical, column) else {
            return Ok(false);
        };
        if values.is_empty() {
            return Err(ProxyError::EmptyInList(format!(
                "{}/{logical}",
                self.cursor.current_data_source()
            )));
        }
        self.write_predicate_column(pattern.expr, arena, out)?;
        out.push_str(" IN (");
        write_value_list(values, out);
        out.push(')');
        Ok(true)
    }

    fn write_between(
        &self,
        id: NodeId,
        arena: &Arena,
        logical: &str,
        out: &mut String,
    ) -> Result<bool> {
        let Node::Between(between) = arena.node(id) else {
            return Ok(false);
        };
        let Some(descriptor) = self.explain.descriptor_of(logical) else {
            return Ok(false);
        };
        let ShardingStrategy::Range { bounds, .. } = &descriptor.table_strategy else {
            // No value domain to intersect with; the bounds pass through.
            return Ok(false);
        };
        let Some(physical) = self.cursor.physical_table(logical) else {
            return Ok(false);
        };
        let Some(index) = descriptor
            .physical_tables()
            .iter()
            .position(|t| t == physical)
        else {
            return Ok(false);
        };
        let (Some(low), Some(high)) = (
            literal_i64(arena, between.low),
            literal_i64(arena, between.high),
        ) else {
            return Ok(false);
        };

        let domain_low = if index == 0 { i64::MIN } else { bounds[index - 1] };
        let domain_high = if index < bounds.len() {
            bounds[index] - 1
        } else {
            i64::MAX
        };

        self.write_predicate_column(between.expr, arena, out)?;
        out.push_str(" BETWEEN ");
        out.push_str(&low.max(domain_low).to_string());
        out.push_str(" AND ");
        out.push_str(&high.min(domain_high).to_string());
        Ok(true)
    }

    /// The column side of a rewritten predicate, honoring its own column
    /// writer when one is bound.
    fn write_predicate_column(&self, id: NodeId, arena: &Arena, out: &mut String) -> Result<()> {
        if let Some(RewriteOp::Column { logical }) = self.explain.rewrite_op(id) {
            if self.write_column(id, arena, logical, out)? {
                return Ok(());
            }
        }
        if let Node::ColumnName(column) = arena.node(id) {
            if let Some(qualifier) = &column.qualifier {
                out.push_str(qualifier);
                out.push('.');
            }
            out.push_str(&column.column);
        }
        Ok(())
    }
}

fn literal_i64(arena: &Arena, id: NodeId) -> Option<i64> {
    match arena.node(id) {
        Node::Literal(v) => v.to_i64().ok(),
        Node::Paren(inner) => literal_i64(arena, *inner),
        _ => None,
    }
}

fn write_value_list(values: &[Value], out: &mut String) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&value.to_sql_string());
    }
}
