// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Arena-backed AST
//!
//! Nodes live in a flat arena and reference each other through [`NodeId`].
//! Rewrite machinery stores node ids, never node references, so the explain
//! result can own both the AST and its writer bindings.

use proxy_mysql::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A parsed statement: the arena, its root node, and how many `?`
/// placeholders the text carried.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub arena: Arena,
    pub root: NodeId,
    pub bind_count: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Select(SelectStmt),
    Union(UnionStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    TableSource(TableSource),
    ColumnName(ColumnName),
    PatternIn(PatternIn),
    Between(Between),
    Limit(LimitClause),
    BinaryOp { op: BinOp, left: NodeId, right: NodeId },
    UnaryOp { op: UnOp, operand: NodeId },
    Literal(Value),
    /// 0-based placeholder index in statement order.
    BindParam(usize),
    /// `*` or `qualifier.*` in a select list.
    Wildcard(Option<String>),
    FieldExpr(FieldExpr),
    Paren(NodeId),
    /// An expression shape the analyzer does not model; rendered back
    /// verbatim and never prunable.
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    pub fields: Vec<NodeId>,
    pub from: Vec<FromItem>,
    pub where_clause: Option<NodeId>,
    pub group_by: Vec<NodeId>,
    pub having: Option<NodeId>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionStmt {
    pub selects: Vec<NodeId>,
    pub all: bool,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: NodeId,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<NodeId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: NodeId,
    pub assignments: Vec<(String, NodeId)>,
    pub where_clause: Option<NodeId>,
    pub limit: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: NodeId,
    pub where_clause: Option<NodeId>,
    pub limit: Option<NodeId>,
}

/// One table reference in a FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub table: NodeId,
    /// `None` for the first item or a comma join.
    pub join: Option<JoinSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub on: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSource {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableSource {
    /// The name predicates resolve against: the alias when present.
    pub fn binding_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnName {
    pub qualifier: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternIn {
    pub expr: NodeId,
    pub list: Vec<NodeId>,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Between {
    pub expr: NodeId,
    pub low: NodeId,
    pub high: NodeId,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitClause {
    pub offset: u64,
    pub count: u64,
    pub has_offset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    pub expr: NodeId,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: NodeId,
    pub asc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Eq => "=",
            BinOp::NotEq => "<>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}
