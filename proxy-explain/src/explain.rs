// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The explain walk
//!
//! One pass over the statement resolves sharded tables, registers rewrite
//! bindings, extracts the condition tree, and captures the limit lookup.
//! The explain owns the statement arena; everything else holds node ids.

use crate::condition::{Condition, ConditionTree, Operand};
use crate::context::ShardCursor;
use crate::rewrite::ExplainRewriter;
use proxy_analysis::{restore, Arena, BinOp, Node, NodeId, ParsedStatement, SelectStmt, UnOp};
use proxy_catalog::{CatalogSnapshot, ShardingTable, ShardingValues};
use proxy_common::{ProxyError, Result};
use proxy_mysql::BindVariable;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitLookup {
    pub has_limit: bool,
    pub has_offset: bool,
    pub offset: u64,
    pub count: u64,
}

/// A writer binding attached to one AST node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RewriteOp {
    Table { logical: String },
    Column { logical: String },
    In {
        logical: String,
        column: String,
        bind_slots: Vec<usize>,
    },
    Between { logical: String, column: String },
    Limit,
}

/// A partitionable IN predicate, surfaced to the generation runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct InRewrite {
    pub logical: String,
    pub column: String,
    pub bind_slots: Vec<usize>,
}

struct Binding {
    logical: String,
    aliased: bool,
    descriptor: Arc<ShardingTable>,
}

pub struct SqlExplain {
    stmt: ParsedStatement,
    tables: Vec<Arc<ShardingTable>>,
    pub(crate) rewrites: HashMap<NodeId, RewriteOp>,
    condition: ConditionTree,
    limit_lookup: LimitLookup,
    has_expressions: bool,
}

impl SqlExplain {
    /// Walks `stmt` against a catalog snapshot. `default_schema` resolves
    /// unqualified table names.
    pub fn new(
        stmt: ParsedStatement,
        snapshot: &CatalogSnapshot,
        default_schema: Option<&str>,
    ) -> Result<SqlExplain> {
        let mut walker = Walker {
            arena: &stmt.arena,
            snapshot,
            default_schema,
            tables: Vec::new(),
            bindings: HashMap::new(),
            rewrites: HashMap::new(),
            conditions: Vec::new(),
            limit_lookup: LimitLookup::default(),
        };
        walker.walk_statement(stmt.root)?;

        let Walker {
            tables,
            rewrites,
            conditions,
            limit_lookup,
            ..
        } = walker;
        let condition = ConditionTree::and(conditions);
        let has_expressions = condition.has_bind_operands();
        Ok(SqlExplain {
            tables,
            rewrites,
            condition,
            limit_lookup,
            has_expressions,
            stmt,
        })
    }

    pub fn statement(&self) -> &ParsedStatement {
        &self.stmt
    }

    /// Sharded tables in first-seen order.
    pub fn sharded_tables(&self) -> &[Arc<ShardingTable>] {
        &self.tables
    }

    pub fn has_sharded_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    pub fn descriptor_of(&self, logical: &str) -> Option<&Arc<ShardingTable>> {
        self.tables
            .iter()
            .find(|t| t.logical_name.eq_ignore_ascii_case(logical))
    }

    pub fn limit_lookup(&self) -> LimitLookup {
        self.limit_lookup
    }

    /// True when a sharding predicate defers to a bind variable.
    pub fn has_expressions(&self) -> bool {
        self.has_expressions
    }

    pub(crate) fn rewrite_op(&self, id: NodeId) -> Option<&RewriteOp> {
        self.rewrites.get(&id)
    }

    /// The partitionable IN predicates recorded during the walk.
    pub fn in_rewrites(&self) -> Vec<InRewrite> {
        self.rewrites
            .values()
            .filter_map(|op| match op {
                RewriteOp::In {
                    logical,
                    column,
                    bind_slots,
                } => Some(InRewrite {
                    logical: logical.clone(),
                    column: column.clone(),
                    bind_slots: bind_slots.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Substitutes bind variables into the deferred condition tree and
    /// yields per-table sharding values. Every sharded table gets an entry,
    /// so a predicate-free statement still scatters instead of passing
    /// through.
    pub fn restore_sharding_values(
        &self,
        binds: &[BindVariable],
    ) -> Result<BTreeMap<String, ShardingValues>> {
        let mut values = self.condition.evaluate(binds)?;
        for table in &self.tables {
            values.entry(table.logical_name.clone()).or_default();
        }
        Ok(values)
    }

    /// Renders the statement for the cursor's current shard, delegating
    /// each bound node to its writer.
    pub fn restore_sql(&self, cursor: &dyn ShardCursor) -> Result<String> {
        restore(
            &self.stmt,
            &ExplainRewriter {
                explain: self,
                cursor,
            },
        )
    }

    /// ORDER BY columns of the root select, for the proxy-side merge.
    pub fn order_by_columns(&self) -> Vec<(String, bool)> {
        let order_by = match self.stmt.arena.node(self.stmt.root) {
            Node::Select(select) => &select.order_by,
            Node::Union(union) => &union.order_by,
            _ => return Vec::new(),
        };
        order_by
            .iter()
            .filter_map(|item| match self.stmt.arena.node(item.expr) {
                Node::ColumnName(c) => Some((c.column.clone(), item.asc)),
                _ => None,
            })
            .collect()
    }
}

struct Walker<'a> {
    arena: &'a Arena,
    snapshot: &'a CatalogSnapshot,
    default_schema: Option<&'a str>,
    tables: Vec<Arc<ShardingTable>>,
    bindings: HashMap<String, Binding>,
    rewrites: HashMap<NodeId, RewriteOp>,
    conditions: Vec<ConditionTree>,
    limit_lookup: LimitLookup,
}

impl<'a> Walker<'a> {
    fn walk_statement(&mut self, root: NodeId) -> Result<()> {
        match self.arena.node(root) {
            Node::Select(select) => self.walk_select(select, true),
            Node::Union(union) => {
                for &branch in &union.selects {
                    match self.arena.node(branch) {
                        Node::Select(select) => self.walk_select(select, false)?,
                        other => {
                            return Err(ProxyError::ParseContext(format!(
                                "union branch is not a select: {other:?}"
                            )))
                        }
                    }
                }
                if let Some(limit) = union.limit {
                    self.record_limit(limit);
                }
                Ok(())
            }
            Node::Insert(insert) => self.walk_insert(insert),
            Node::Update(update) => self.walk_update(update),
            Node::Delete(delete) => self.walk_delete(delete),
            other => Err(ProxyError::ParseContext(format!(
                "cannot explain node {other:?}"
            ))),
        }
    }

    fn walk_select(&mut self, select: &SelectStmt, top_level: bool) -> Result<()> {
        for item in &select.from {
            self.register_table(item.table)?;
        }
        for &field in &select.fields {
            if let Node::FieldExpr(f) = self.arena.node(field) {
                self.register_columns(f.expr, false);
            }
        }
        for item in &select.from {
            if let Some(on) = item.join.as_ref().and_then(|j| j.on) {
                let tree = self.predicate_tree(on, false)?;
                self.conditions.push(tree);
            }
        }
        if let Some(where_clause) = select.where_clause {
            let tree = self.predicate_tree(where_clause, false)?;
            self.conditions.push(tree);
        }
        for &expr in &select.group_by {
            self.register_columns(expr, true);
        }
        if let Some(having) = select.having {
            // HAVING filters grouped output; columns rewrite, values do not
            // prune.
            self.register_columns(having, true);
        }
        for item in &select.order_by {
            self.register_columns(item.expr, true);
        }
        if top_level {
            if let Some(limit) = select.limit {
                self.record_limit(limit);
            }
        }
        Ok(())
    }

    fn walk_insert(&mut self, insert: &proxy_analysis::InsertStmt) -> Result<()> {
        let descriptor = self.register_table(insert.table)?;
        let Some(descriptor) = descriptor else {
            return Ok(());
        };
        if insert.rows.len() > 1 {
            return Err(ProxyError::ShardingUnsupported(format!(
                "multi-row INSERT into sharded table {}",
                descriptor.logical_name
            )));
        }
        if insert.columns.is_empty() {
            self.conditions.push(ConditionTree::Unsupported(vec![
                descriptor.logical_name.clone(),
            ]));
            return Ok(());
        }
        let Some(row) = insert.rows.first() else {
            return Ok(());
        };
        let mut leaves = Vec::new();
        for (column, &expr) in insert.columns.iter().zip(row.iter()) {
            if !descriptor.is_shard_column(column) {
                continue;
            }
            match self.operand_of(expr) {
                Some(operand) => leaves.push(ConditionTree::Leaf(Condition::Eq {
                    table: descriptor.logical_name.clone(),
                    column: column.clone(),
                    operand,
                })),
                None => leaves.push(ConditionTree::Unsupported(vec![
                    descriptor.logical_name.clone(),
                ])),
            }
        }
        self.conditions.push(ConditionTree::and(leaves));
        Ok(())
    }

    fn walk_update(&mut self, update: &proxy_analysis::UpdateStmt) -> Result<()> {
        let descriptor = self.register_table(update.table)?;
        if let Some(descriptor) = &descriptor {
            for (column, _) in &update.assignments {
                if descriptor.is_shard_column(column) {
                    return Err(ProxyError::ShardingUnsupported(format!(
                        "UPDATE of sharding column {}.{column}",
                        descriptor.logical_name
                    )));
                }
            }
        }
        for (_, expr) in &update.assignments {
            self.register_columns(*expr, true);
        }
        if let Some(where_clause) = update.where_clause {
            let tree = self.predicate_tree(where_clause, false)?;
            self.conditions.push(tree);
        }
        if let Some(limit) = update.limit {
            self.record_limit(limit);
        }
        Ok(())
    }

    fn walk_delete(&mut self, delete: &proxy_analysis::DeleteStmt) -> Result<()> {
        self.register_table(delete.table)?;
        if let Some(where_clause) = delete.where_clause {
            let tree = self.predicate_tree(where_clause, false)?;
            self.conditions.push(tree);
        }
        if let Some(limit) = delete.limit {
            self.record_limit(limit);
        }
        Ok(())
    }

    /// Resolves a TableSource against the catalog. Sharded tables get a
    /// table-name writer and a binding entry; unknown tables pass through.
    fn register_table(&mut self, id: NodeId) -> Result<Option<Arc<ShardingTable>>> {
        let table = match self.arena.node(id) {
            Node::TableSource(t) => t,
            other => {
                return Err(ProxyError::ParseContext(format!(
                    "table source is not a table name: {other:?}"
                )))
            }
        };
        let schema = table
            .schema
            .as_deref()
            .or(self.default_schema)
            .unwrap_or_default();
        let Some(descriptor) = self.snapshot.lookup(schema, &table.table) else {
            return Ok(None);
        };

        if !self
            .tables
            .iter()
            .any(|t| t.logical_name == descriptor.logical_name)
        {
            self.tables.push(descriptor.clone());
        }
        self.rewrites.insert(
            id,
            RewriteOp::Table {
                logical: descriptor.logical_name.clone(),
            },
        );
        let aliased = table.alias.is_some();
        if let Some(alias) = &table.alias {
            self.bindings.insert(
                alias.to_lowercase(),
                Binding {
                    logical: descriptor.logical_name.clone(),
                    aliased: true,
                    descriptor: descriptor.clone(),
                },
            );
        }
        self.bindings.insert(
            table.table.to_lowercase(),
            Binding {
                logical: descriptor.logical_name.clone(),
                aliased,
                descriptor: descriptor.clone(),
            },
        );
        Ok(Some(descriptor))
    }

    /// Registers column-name writers for every column reference under
    /// `id`. `predicate_context` permits rewriting table-name qualifiers
    /// even when the table is aliased.
    fn register_columns(&mut self, id: NodeId, predicate_context: bool) {
        match self.arena.node(id) {
            Node::ColumnName(c) => {
                let Some(qualifier) = &c.qualifier else {
                    return;
                };
                let key = qualifier.to_lowercase();
                let Some(binding) = self.bindings.get(&key) else {
                    return;
                };
                // An alias qualifier stays valid after the table rename.
                if binding
                    .descriptor
                    .logical_name
                    .eq_ignore_ascii_case(qualifier)
                    && (!binding.aliased || predicate_context)
                {
                    self.rewrites.insert(
                        id,
                        RewriteOp::Column {
                            logical: binding.logical.clone(),
                        },
                    );
                }
            }
            Node::BinaryOp { left, right, .. } => {
                self.register_columns(*left, predicate_context);
                self.register_columns(*right, predicate_context);
            }
            Node::UnaryOp { operand, .. } => self.register_columns(*operand, predicate_context),
            Node::Paren(inner) => self.register_columns(*inner, predicate_context),
            Node::PatternIn(p) => {
                self.register_columns(p.expr, predicate_context);
                for &item in &p.list {
                    self.register_columns(item, predicate_context);
                }
            }
            Node::Between(b) => {
                self.register_columns(b.expr, predicate_context);
                self.register_columns(b.low, predicate_context);
                self.register_columns(b.high, predicate_context);
            }
            Node::FieldExpr(f) => self.register_columns(f.expr, predicate_context),
            _ => {}
        }
    }

    /// Extracts the condition tree for a predicate expression, registering
    /// column writers along the way. `under_not` suppresses writer
    /// registration for IN/BETWEEN because those shards broadcast anyway.
    fn predicate_tree(&mut self, id: NodeId, under_not: bool) -> Result<ConditionTree> {
        let node = self.arena.node(id);
        Ok(match node {
            Node::BinaryOp {
                op: BinOp::And,
                left,
                right,
            } => ConditionTree::and(vec![
                self.predicate_tree(*left, under_not)?,
                self.predicate_tree(*right, under_not)?,
            ]),
            Node::BinaryOp {
                op: BinOp::Or,
                left,
                right,
            } => ConditionTree::or(vec![
                self.predicate_tree(*left, under_not)?,
                self.predicate_tree(*right, under_not)?,
            ]),
            Node::BinaryOp {
                op: BinOp::Eq,
                left,
                right,
            } => {
                self.register_columns(*left, true);
                self.register_columns(*right, true);
                let pair = match (self.shard_column_of(*left), self.operand_of(*right)) {
                    (Some(target), Some(operand)) => Some((target, operand)),
                    _ => match (self.shard_column_of(*right), self.operand_of(*left)) {
                        (Some(target), Some(operand)) => Some((target, operand)),
                        _ => None,
                    },
                };
                match pair {
                    Some(((table, column), operand)) => ConditionTree::Leaf(Condition::Eq {
                        table,
                        column,
                        operand,
                    }),
                    None => ConditionTree::True,
                }
            }
            Node::BinaryOp { left, right, .. } => {
                self.register_columns(*left, true);
                self.register_columns(*right, true);
                ConditionTree::True
            }
            Node::UnaryOp {
                op: UnOp::Not,
                operand,
            } => {
                // Negation defeats pruning for every sharded table it
                // mentions.
                self.predicate_tree(*operand, true)?;
                let tables = self.sharded_tables_under(*operand);
                if tables.is_empty() {
                    ConditionTree::True
                } else {
                    ConditionTree::Unsupported(tables)
                }
            }
            Node::UnaryOp { operand, .. } => {
                self.register_columns(*operand, true);
                ConditionTree::True
            }
            Node::Paren(inner) => self.predicate_tree(*inner, under_not)?,
            Node::PatternIn(p) => {
                self.register_columns(p.expr, true);
                let Some((table, column)) = self.shard_column_of(p.expr) else {
                    return Ok(ConditionTree::True);
                };
                if p.negated {
                    return Ok(ConditionTree::Unsupported(vec![table]));
                }
                let mut operands = Vec::with_capacity(p.list.len());
                let mut bind_slots = Vec::new();
                for &item in &p.list {
                    match self.operand_of(item) {
                        Some(operand) => {
                            if let Operand::Bind(slot) = &operand {
                                bind_slots.push(*slot);
                            }
                            operands.push(operand);
                        }
                        None => return Ok(ConditionTree::Unsupported(vec![table])),
                    }
                }
                if !under_not {
                    self.rewrites.insert(
                        id,
                        RewriteOp::In {
                            logical: table.clone(),
                            column: column.clone(),
                            bind_slots,
                        },
                    );
                }
                ConditionTree::Leaf(Condition::In {
                    table,
                    column,
                    operands,
                })
            }
            Node::Between(b) => {
                self.register_columns(b.expr, true);
                let Some((table, column)) = self.shard_column_of(b.expr) else {
                    return Ok(ConditionTree::True);
                };
                if b.negated {
                    return Ok(ConditionTree::Unsupported(vec![table]));
                }
                let (Some(low), Some(high)) = (self.operand_of(b.low), self.operand_of(b.high))
                else {
                    return Ok(ConditionTree::Unsupported(vec![table]));
                };
                if !bounds_comparable(self.arena, b.low, b.high) {
                    return Ok(ConditionTree::Unsupported(vec![table]));
                }
                if !under_not {
                    self.rewrites.insert(
                        id,
                        RewriteOp::Between {
                            logical: table.clone(),
                            column: column.clone(),
                        },
                    );
                }
                ConditionTree::Leaf(Condition::Between {
                    table,
                    column,
                    low,
                    high,
                })
            }
            Node::ColumnName(_) => {
                self.register_columns(id, true);
                ConditionTree::True
            }
            _ => ConditionTree::True,
        })
    }

    /// `(logical_table, column)` when `id` is a column reference to a
    /// shard column of a sharded table in scope.
    fn shard_column_of(&self, id: NodeId) -> Option<(String, String)> {
        let Node::ColumnName(c) = self.arena.node(id) else {
            return None;
        };
        let binding = match &c.qualifier {
            Some(qualifier) => self.bindings.get(&qualifier.to_lowercase())?,
            None => {
                // Unqualified: unambiguous only when exactly one sharded
                // table in scope carries this shard column.
                let mut found = None;
                for table in &self.tables {
                    if table.is_shard_column(&c.column) {
                        if found.is_some() {
                            return None;
                        }
                        found = Some(table);
                    }
                }
                let table = found?;
                return Some((table.logical_name.clone(), c.column.clone()));
            }
        };
        if binding.descriptor.is_shard_column(&c.column) {
            Some((binding.logical.clone(), c.column.clone()))
        } else {
            None
        }
    }

    fn operand_of(&self, id: NodeId) -> Option<Operand> {
        match self.arena.node(id) {
            Node::Literal(v) => Some(Operand::Value(v.clone())),
            Node::BindParam(slot) => Some(Operand::Bind(*slot)),
            Node::Paren(inner) => self.operand_of(*inner),
            _ => None,
        }
    }

    fn sharded_tables_under(&self, id: NodeId) -> Vec<String> {
        let mut tables = BTreeSet::new();
        self.collect_tables_under(id, &mut tables);
        tables.into_iter().collect()
    }

    fn collect_tables_under(&self, id: NodeId, out: &mut BTreeSet<String>) {
        match self.arena.node(id) {
            Node::ColumnName(c) => match &c.qualifier {
                Some(qualifier) => {
                    if let Some(binding) = self.bindings.get(&qualifier.to_lowercase()) {
                        out.insert(binding.logical.clone());
                    }
                }
                None => {
                    for table in &self.tables {
                        if table.is_shard_column(&c.column) {
                            out.insert(table.logical_name.clone());
                        }
                    }
                }
            },
            Node::BinaryOp { left, right, .. } => {
                self.collect_tables_under(*left, out);
                self.collect_tables_under(*right, out);
            }
            Node::UnaryOp { operand, .. } => self.collect_tables_under(*operand, out),
            Node::Paren(inner) => self.collect_tables_under(*inner, out),
            Node::PatternIn(p) => self.collect_tables_under(p.expr, out),
            Node::Between(b) => self.collect_tables_under(b.expr, out),
            _ => {}
        }
    }

    fn record_limit(&mut self, id: NodeId) {
        let Node::Limit(limit) = self.arena.node(id) else {
            return;
        };
        self.limit_lookup = LimitLookup {
            has_limit: true,
            has_offset: limit.has_offset,
            offset: limit.offset,
            count: limit.count,
        };
        if limit.has_offset && !self.tables.is_empty() {
            self.rewrites.insert(id, RewriteOp::Limit);
        }
    }
}

/// BETWEEN bounds must share a numeric or temporal kind; bind operands
/// defer the check to runtime.
fn bounds_comparable(arena: &Arena, low: NodeId, high: NodeId) -> bool {
    let kind = |id: NodeId| match arena.node(id) {
        Node::Literal(v) => {
            if v.value_type().is_number() {
                Some(0u8)
            } else if v.value_type().is_temporal() {
                Some(1)
            } else {
                Some(2)
            }
        }
        Node::BindParam(_) => None,
        Node::Paren(_) => None,
        _ => Some(3),
    };
    match (kind(low), kind(high)) {
        (Some(a), Some(b)) => a == b && a < 2,
        _ => true,
    }
}
