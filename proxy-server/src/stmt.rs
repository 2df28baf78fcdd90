// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Per-connection prepared statements
//!
//! The registry is exclusive to one connection. Parameter and column
//! definitions for the prepare response derive from the statement's
//! explain result: parameters are synthesized `?` fields, columns come
//! from select items that resolve to plain names, and anything else
//! (wildcards, expressions) leaves the column block empty.

use proxy_analysis::{Node, SqlParser};
use proxy_catalog::CatalogSnapshot;
use proxy_common::Result;
use proxy_explain::SqlExplain;
use proxy_mysql::resultset::Field;
use proxy_mysql::MySqlType;
use std::collections::HashMap;

pub struct PreparedStatement {
    pub id: u32,
    pub sql: String,
    pub param_count: usize,
    pub explain: SqlExplain,
    pub params: Vec<Field>,
    pub columns: Vec<Field>,
}

#[derive(Default)]
pub struct StmtRegistry {
    next_id: u32,
    statements: HashMap<u32, PreparedStatement>,
}

impl StmtRegistry {
    pub fn new() -> StmtRegistry {
        StmtRegistry::default()
    }

    pub fn prepare(
        &mut self,
        sql: &str,
        snapshot: &CatalogSnapshot,
        default_schema: Option<&str>,
    ) -> Result<&PreparedStatement> {
        let stmt = SqlParser::parse_one(sql)?;
        let param_count = stmt.bind_count;
        let explain = SqlExplain::new(stmt, snapshot, default_schema)?;

        self.next_id += 1;
        let id = self.next_id;
        let params = vec![Field::parameter(); param_count];
        let columns = derive_columns(&explain);
        self.statements.insert(
            id,
            PreparedStatement {
                id,
                sql: sql.to_string(),
                param_count,
                explain,
                params,
                columns,
            },
        );
        Ok(&self.statements[&id])
    }

    pub fn get(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    pub fn close(&mut self, id: u32) {
        self.statements.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Column definitions for the prepare response, when the select list is
/// plain enough to name them up front.
fn derive_columns(explain: &SqlExplain) -> Vec<Field> {
    let stmt = explain.statement();
    let Node::Select(select) = stmt.arena.node(stmt.root) else {
        return Vec::new();
    };
    let mut fields = Vec::with_capacity(select.fields.len());
    for &item in &select.fields {
        let Node::FieldExpr(field) = stmt.arena.node(item) else {
            // A wildcard needs backend metadata; leave the block empty.
            return Vec::new();
        };
        let name = match (&field.alias, stmt.arena.node(field.expr)) {
            (Some(alias), _) => alias.clone(),
            (None, Node::ColumnName(c)) => c.column.clone(),
            _ => return Vec::new(),
        };
        fields.push(Field::new(name, MySqlType::VarChar));
    }
    fields
}
