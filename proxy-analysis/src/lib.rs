// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! SQL analysis front-end
//!
//! Parses SQL through sqlparser and lowers it into an arena-backed AST with
//! stable node ids. Downstream crates attach rewrite bindings to node ids
//! without owning the nodes; [`restore`] renders a statement back to SQL,
//! consulting a [`NodeRewriter`] for per-shard overrides.

pub mod ast;
pub mod parser;
pub mod restore;

pub use ast::{
    Arena, BinOp, Between, ColumnName, DeleteStmt, FieldExpr, FromItem, InsertStmt, JoinKind,
    JoinSpec, LimitClause, Node, NodeId, OrderByItem, ParsedStatement, PatternIn, SelectStmt,
    TableSource, UnOp, UnionStmt, UpdateStmt,
};
pub use parser::SqlParser;
pub use restore::{render_limit, render_table_name, restore, NodeRewriter, PassthroughRewriter};
