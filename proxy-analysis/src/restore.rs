// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Rendering a parsed statement back to SQL
//!
//! The restorer walks the arena and asks the [`NodeRewriter`] before
//! rendering each node. A rewriter that handles a node writes the complete
//! replacement text for it; unhandled nodes render in their original shape.

use crate::ast::*;
use proxy_common::{ProxyError, Result};

pub trait NodeRewriter {
    /// Writes replacement text for `id` into `out` and returns `true`, or
    /// returns `false` to keep the default rendering.
    fn rewrite_node(&self, id: NodeId, arena: &Arena, out: &mut String) -> Result<bool>;
}

/// Rewrites nothing; restores the statement in its original shape.
pub struct PassthroughRewriter;

impl NodeRewriter for PassthroughRewriter {
    fn rewrite_node(&self, _id: NodeId, _arena: &Arena, _out: &mut String) -> Result<bool> {
        Ok(false)
    }
}

pub fn restore(stmt: &ParsedStatement, rewriter: &dyn NodeRewriter) -> Result<String> {
    let mut out = String::with_capacity(stmt.text.len() + 16);
    let r = Restorer {
        arena: &stmt.arena,
        rewriter,
    };
    r.render(stmt.root, &mut out)?;
    Ok(out)
}

struct Restorer<'a> {
    arena: &'a Arena,
    rewriter: &'a dyn NodeRewriter,
}

impl<'a> Restorer<'a> {
    fn render(&self, id: NodeId, out: &mut String) -> Result<()> {
        if self.rewriter.rewrite_node(id, self.arena, out)? {
            return Ok(());
        }
        match self.arena.node(id) {
            Node::Select(select) => self.render_select(select, out),
            Node::Union(union) => self.render_union(union, out),
            Node::Insert(insert) => self.render_insert(insert, out),
            Node::Update(update) => self.render_update(update, out),
            Node::Delete(delete) => self.render_delete(delete, out),
            Node::TableSource(table) => {
                render_table_name(table, out);
                if let Some(alias) = &table.alias {
                    out.push(' ');
                    out.push_str(alias);
                }
                Ok(())
            }
            Node::ColumnName(column) => {
                if let Some(qualifier) = &column.qualifier {
                    out.push_str(qualifier);
                    out.push('.');
                }
                out.push_str(&column.column);
                Ok(())
            }
            Node::PatternIn(pattern) => {
                self.render(pattern.expr, out)?;
                if pattern.negated {
                    out.push_str(" NOT");
                }
                out.push_str(" IN (");
                self.render_list(&pattern.list, out)?;
                out.push(')');
                Ok(())
            }
            Node::Between(between) => {
                self.render(between.expr, out)?;
                if between.negated {
                    out.push_str(" NOT");
                }
                out.push_str(" BETWEEN ");
                self.render(between.low, out)?;
                out.push_str(" AND ");
                self.render(between.high, out)?;
                Ok(())
            }
            Node::Limit(limit) => {
                render_limit(limit, out);
                Ok(())
            }
            Node::BinaryOp { op, left, right } => {
                self.render(*left, out)?;
                out.push(' ');
                out.push_str(op.as_sql());
                out.push(' ');
                self.render(*right, out)
            }
            Node::UnaryOp { op, operand } => {
                match op {
                    UnOp::Not => {
                        out.push_str("NOT ");
                        self.render(*operand, out)
                    }
                    UnOp::Neg => {
                        out.push('-');
                        self.render(*operand, out)
                    }
                }
            }
            Node::Literal(value) => {
                out.push_str(&value.to_sql_string());
                Ok(())
            }
            Node::BindParam(_) => {
                out.push('?');
                Ok(())
            }
            Node::Wildcard(qualifier) => {
                if let Some(q) = qualifier {
                    out.push_str(q);
                    out.push('.');
                }
                out.push('*');
                Ok(())
            }
            Node::FieldExpr(field) => {
                self.render(field.expr, out)?;
                if let Some(alias) = &field.alias {
                    out.push_str(" AS ");
                    out.push_str(alias);
                }
                Ok(())
            }
            Node::Paren(inner) => {
                out.push('(');
                self.render(*inner, out)?;
                out.push(')');
                Ok(())
            }
            Node::Verbatim(text) => {
                out.push_str(text);
                Ok(())
            }
        }
    }

    fn render_list(&self, items: &[NodeId], out: &mut String) -> Result<()> {
        for (i, &item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.render(item, out)?;
        }
        Ok(())
    }

    fn render_select(&self, select: &SelectStmt, out: &mut String) -> Result<()> {
        out.push_str("SELECT ");
        if select.distinct {
            out.push_str("DISTINCT ");
        }
        self.render_list(&select.fields, out)?;
        if !select.from.is_empty() {
            out.push_str(" FROM ");
            self.render_from(&select.from, out)?;
        }
        if let Some(where_clause) = select.where_clause {
            out.push_str(" WHERE ");
            self.render(where_clause, out)?;
        }
        if !select.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            self.render_list(&select.group_by, out)?;
        }
        if let Some(having) = select.having {
            out.push_str(" HAVING ");
            self.render(having, out)?;
        }
        self.render_order_by(&select.order_by, out)?;
        if let Some(limit) = select.limit {
            out.push(' ');
            self.render(limit, out)?;
        }
        Ok(())
    }

    fn render_from(&self, from: &[FromItem], out: &mut String) -> Result<()> {
        for (i, item) in from.iter().enumerate() {
            match &item.join {
                None => {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(item.table, out)?;
                }
                Some(spec) => {
                    out.push_str(match spec.kind {
                        JoinKind::Inner => " INNER JOIN ",
                        JoinKind::Left => " LEFT JOIN ",
                        JoinKind::Right => " RIGHT JOIN ",
                    });
                    self.render(item.table, out)?;
                    if let Some(on) = spec.on {
                        out.push_str(" ON ");
                        self.render(on, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn render_order_by(&self, order_by: &[OrderByItem], out: &mut String) -> Result<()> {
        if order_by.is_empty() {
            return Ok(());
        }
        out.push_str(" ORDER BY ");
        for (i, item) in order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.render(item.expr, out)?;
            if !item.asc {
                out.push_str(" DESC");
            }
        }
        Ok(())
    }

    fn render_union(&self, union: &UnionStmt, out: &mut String) -> Result<()> {
        for (i, &select) in union.selects.iter().enumerate() {
            if i > 0 {
                out.push_str(if union.all { " UNION ALL " } else { " UNION " });
            }
            self.render(select, out)?;
        }
        self.render_order_by(&union.order_by, out)?;
        if let Some(limit) = union.limit {
            out.push(' ');
            self.render(limit, out)?;
        }
        Ok(())
    }

    fn render_insert(&self, insert: &InsertStmt, out: &mut String) -> Result<()> {
        out.push_str("INSERT INTO ");
        self.render(insert.table, out)?;
        if !insert.columns.is_empty() {
            out.push_str(" (");
            out.push_str(&insert.columns.join(", "));
            out.push(')');
        }
        if insert.rows.is_empty() {
            return Err(ProxyError::ParseContext(
                "INSERT without VALUES".to_string(),
            ));
        }
        out.push_str(" VALUES ");
        for (i, row) in insert.rows.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push('(');
            self.render_list(row, out)?;
            out.push(')');
        }
        Ok(())
    }

    fn render_update(&self, update: &UpdateStmt, out: &mut String) -> Result<()> {
        out.push_str("UPDATE ");
        self.render(update.table, out)?;
        out.push_str(" SET ");
        for (i, (column, value)) in update.assignments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(column);
            out.push_str(" = ");
            self.render(*value, out)?;
        }
        if let Some(where_clause) = update.where_clause {
            out.push_str(" WHERE ");
            self.render(where_clause, out)?;
        }
        if let Some(limit) = update.limit {
            out.push(' ');
            self.render(limit, out)?;
        }
        Ok(())
    }

    fn render_delete(&self, delete: &DeleteStmt, out: &mut String) -> Result<()> {
        out.push_str("DELETE FROM ");
        self.render(delete.table, out)?;
        if let Some(where_clause) = delete.where_clause {
            out.push_str(" WHERE ");
            self.render(where_clause, out)?;
        }
        if let Some(limit) = delete.limit {
            out.push(' ');
            self.render(limit, out)?;
        }
        Ok(())
    }
}

/// Renders the qualified table name without the alias. Table-name writers
/// reuse this for the passthrough case.
pub fn render_table_name(table: &TableSource, out: &mut String) {
    if let Some(schema) = &table.schema {
        out.push_str(schema);
        out.push('.');
    }
    out.push_str(&table.table);
}

/// Renders a limit clause.
pub fn render_limit(limit: &LimitClause, out: &mut String) {
    out.push_str("LIMIT ");
    if limit.has_offset {
        out.push_str(&limit.offset.to_string());
        out.push_str(", ");
    }
    out.push_str(&limit.count.to_string());
}
