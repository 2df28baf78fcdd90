// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! SQL parsing and lowering
//!
//! sqlparser produces the surface AST; [`Lower`] flattens the parts the
//! explain engine reasons about into the arena. Expression shapes outside
//! that set are kept as [`Node::Verbatim`] text: they restore byte-for-byte
//! and simply contribute no shard pruning.

use crate::ast::*;
use proxy_common::{ProxyError, Result};
use proxy_mysql::{MySqlType, Value};
use sqlparser::ast as sql;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

pub struct SqlParser;

impl SqlParser {
    pub fn parse(text: &str) -> Result<Vec<ParsedStatement>> {
        let statements = Parser::parse_sql(&MySqlDialect {}, text)
            .map_err(|e| ProxyError::ParseContext(e.to_string()))?;
        statements
            .into_iter()
            .map(|stmt| Lower::new(text).lower(stmt))
            .collect()
    }

    pub fn parse_one(text: &str) -> Result<ParsedStatement> {
        let mut statements = Self::parse(text)?;
        if statements.len() != 1 {
            return Err(ProxyError::ParseContext(format!(
                "expected exactly one statement, got {}",
                statements.len()
            )));
        }
        Ok(statements.remove(0))
    }
}

struct Lower<'a> {
    arena: Arena,
    binds: usize,
    text: &'a str,
}

impl<'a> Lower<'a> {
    fn new(text: &'a str) -> Lower<'a> {
        Lower {
            arena: Arena::new(),
            binds: 0,
            text,
        }
    }

    fn lower(mut self, stmt: sql::Statement) -> Result<ParsedStatement> {
        let root = self.lower_statement(stmt)?;
        Ok(ParsedStatement {
            arena: self.arena,
            root,
            bind_count: self.binds,
            text: self.text.to_string(),
        })
    }

    fn lower_statement(&mut self, stmt: sql::Statement) -> Result<NodeId> {
        match stmt {
            sql::Statement::Query(query) => self.lower_query(*query),
            sql::Statement::Insert(insert) => self.lower_insert(insert),
            sql::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.lower_update(table, assignments, selection),
            sql::Statement::Delete(delete) => self.lower_delete(delete),
            other => Err(ProxyError::ParseContext(format!(
                "unsupported statement: {other}"
            ))),
        }
    }

    fn lower_query(&mut self, query: sql::Query) -> Result<NodeId> {
        let order_by = self.lower_order_by(query.order_by)?;
        let limit = self.lower_limit(query.limit, query.offset)?;

        match *query.body {
            sql::SetExpr::Select(select) => self.lower_select(*select, order_by, limit),
            sql::SetExpr::SetOperation {
                op: sql::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let mut selects = Vec::new();
                self.flatten_union(*left, &mut selects)?;
                self.flatten_union(*right, &mut selects)?;
                let all = matches!(set_quantifier, sql::SetQuantifier::All);
                Ok(self.arena.alloc(Node::Union(UnionStmt {
                    selects,
                    all,
                    order_by,
                    limit,
                })))
            }
            other => Err(ProxyError::ParseContext(format!(
                "unsupported query body: {other}"
            ))),
        }
    }

    fn flatten_union(&mut self, body: sql::SetExpr, out: &mut Vec<NodeId>) -> Result<()> {
        match body {
            sql::SetExpr::Select(select) => {
                out.push(self.lower_select(*select, Vec::new(), None)?);
                Ok(())
            }
            sql::SetExpr::SetOperation {
                op: sql::SetOperator::Union,
                left,
                right,
                ..
            } => {
                self.flatten_union(*left, out)?;
                self.flatten_union(*right, out)
            }
            other => Err(ProxyError::ParseContext(format!(
                "unsupported union branch: {other}"
            ))),
        }
    }

    fn lower_select(
        &mut self,
        select: sql::Select,
        order_by: Vec<OrderByItem>,
        limit: Option<NodeId>,
    ) -> Result<NodeId> {
        let mut fields = Vec::with_capacity(select.projection.len());
        for item in select.projection {
            fields.push(self.lower_select_item(item)?);
        }

        let mut from = Vec::new();
        for table_with_joins in select.from {
            self.lower_from(table_with_joins, &mut from)?;
        }

        let where_clause = select
            .selection
            .map(|expr| self.lower_expr(expr))
            .transpose()?;

        let group_by = match select.group_by {
            sql::GroupByExpr::Expressions(exprs, _) => exprs
                .into_iter()
                .map(|e| self.lower_expr(e))
                .collect::<Result<Vec<_>>>()?,
            sql::GroupByExpr::All(_) => Vec::new(),
        };

        let having = select.having.map(|e| self.lower_expr(e)).transpose()?;

        Ok(self.arena.alloc(Node::Select(SelectStmt {
            distinct: select.distinct.is_some(),
            fields,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
        })))
    }

    fn lower_select_item(&mut self, item: sql::SelectItem) -> Result<NodeId> {
        let node = match item {
            sql::SelectItem::Wildcard(_) => Node::Wildcard(None),
            sql::SelectItem::QualifiedWildcard(name, _) => {
                Node::Wildcard(Some(object_name_string(&name)))
            }
            sql::SelectItem::UnnamedExpr(expr) => {
                let expr = self.lower_expr(expr)?;
                Node::FieldExpr(FieldExpr { expr, alias: None })
            }
            sql::SelectItem::ExprWithAlias { expr, alias } => {
                let expr = self.lower_expr(expr)?;
                Node::FieldExpr(FieldExpr {
                    expr,
                    alias: Some(alias.value),
                })
            }
        };
        Ok(self.arena.alloc(node))
    }

    fn lower_from(
        &mut self,
        table_with_joins: sql::TableWithJoins,
        out: &mut Vec<FromItem>,
    ) -> Result<()> {
        let table = self.lower_table_factor(table_with_joins.relation)?;
        out.push(FromItem { table, join: None });
        for join in table_with_joins.joins {
            let (kind, constraint) = match join.join_operator {
                sql::JoinOperator::Inner(c) => (JoinKind::Inner, c),
                sql::JoinOperator::LeftOuter(c) => (JoinKind::Left, c),
                sql::JoinOperator::RightOuter(c) => (JoinKind::Right, c),
                other => {
                    return Err(ProxyError::ParseContext(format!(
                        "unsupported join: {other:?}"
                    )))
                }
            };
            let on = match constraint {
                sql::JoinConstraint::On(expr) => Some(self.lower_expr(expr)?),
                sql::JoinConstraint::None => None,
                other => {
                    return Err(ProxyError::ParseContext(format!(
                        "unsupported join constraint: {other:?}"
                    )))
                }
            };
            let table = self.lower_table_factor(join.relation)?;
            out.push(FromItem {
                table,
                join: Some(JoinSpec { kind, on }),
            });
        }
        Ok(())
    }

    fn lower_table_factor(&mut self, factor: sql::TableFactor) -> Result<NodeId> {
        match factor {
            sql::TableFactor::Table { name, alias, .. } => {
                let mut idents: Vec<String> =
                    name.0.into_iter().map(|ident| ident.value).collect();
                let table = idents
                    .pop()
                    .ok_or_else(|| ProxyError::ParseContext("empty table name".to_string()))?;
                let schema = idents.pop();
                Ok(self.arena.alloc(Node::TableSource(TableSource {
                    schema,
                    table,
                    alias: alias.map(|a| a.name.value),
                })))
            }
            other => Err(ProxyError::ParseContext(format!(
                "unsupported table source: {other}"
            ))),
        }
    }

    fn lower_insert(&mut self, insert: sql::Insert) -> Result<NodeId> {
        let mut idents: Vec<String> = insert
            .table_name
            .0
            .into_iter()
            .map(|ident| ident.value)
            .collect();
        let table_name = idents
            .pop()
            .ok_or_else(|| ProxyError::ParseContext("empty table name".to_string()))?;
        let table = self.arena.alloc(Node::TableSource(TableSource {
            schema: idents.pop(),
            table: table_name,
            alias: None,
        }));

        let columns = insert.columns.into_iter().map(|c| c.value).collect();

        let mut rows = Vec::new();
        if let Some(source) = insert.source {
            match *source.body {
                sql::SetExpr::Values(values) => {
                    for row in values.rows {
                        let row = row
                            .into_iter()
                            .map(|e| self.lower_expr(e))
                            .collect::<Result<Vec<_>>>()?;
                        rows.push(row);
                    }
                }
                other => {
                    return Err(ProxyError::ParseContext(format!(
                        "unsupported insert source: {other}"
                    )))
                }
            }
        }

        Ok(self
            .arena
            .alloc(Node::Insert(InsertStmt { table, columns, rows })))
    }

    fn lower_update(
        &mut self,
        table: sql::TableWithJoins,
        assignments: Vec<sql::Assignment>,
        selection: Option<sql::Expr>,
    ) -> Result<NodeId> {
        let table = self.lower_table_factor(table.relation)?;
        let mut lowered = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = match &assignment.target {
                sql::AssignmentTarget::ColumnName(name) => name
                    .0
                    .last()
                    .map(|ident| ident.value.clone())
                    .unwrap_or_default(),
                other => {
                    return Err(ProxyError::ParseContext(format!(
                        "unsupported assignment target: {other}"
                    )))
                }
            };
            let value = self.lower_expr(assignment.value)?;
            lowered.push((column, value));
        }
        let where_clause = selection.map(|e| self.lower_expr(e)).transpose()?;
        Ok(self.arena.alloc(Node::Update(UpdateStmt {
            table,
            assignments: lowered,
            where_clause,
            limit: None,
        })))
    }

    fn lower_delete(&mut self, delete: sql::Delete) -> Result<NodeId> {
        let tables = match delete.from {
            sql::FromTable::WithFromKeyword(tables) => tables,
            sql::FromTable::WithoutKeyword(tables) => tables,
        };
        let relation = tables
            .into_iter()
            .next()
            .ok_or_else(|| ProxyError::ParseContext("DELETE without a table".to_string()))?;
        let table = self.lower_table_factor(relation.relation)?;
        let where_clause = delete.selection.map(|e| self.lower_expr(e)).transpose()?;
        let limit = delete
            .limit
            .map(|e| -> Result<NodeId> {
                let count = literal_u64(&e)?;
                Ok(self.arena.alloc(Node::Limit(LimitClause {
                    offset: 0,
                    count,
                    has_offset: false,
                })))
            })
            .transpose()?;
        Ok(self.arena.alloc(Node::Delete(DeleteStmt {
            table,
            where_clause,
            limit,
        })))
    }

    fn lower_order_by(&mut self, order_by: Option<sql::OrderBy>) -> Result<Vec<OrderByItem>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };
        order_by
            .exprs
            .into_iter()
            .map(|item| {
                let expr = self.lower_expr(item.expr)?;
                Ok(OrderByItem {
                    expr,
                    asc: item.asc.unwrap_or(true),
                })
            })
            .collect()
    }

    fn lower_limit(
        &mut self,
        limit: Option<sql::Expr>,
        offset: Option<sql::Offset>,
    ) -> Result<Option<NodeId>> {
        let Some(limit) = limit else {
            return Ok(None);
        };
        let count = literal_u64(&limit)?;
        let (offset, has_offset) = match offset {
            Some(o) => (literal_u64(&o.value)?, true),
            None => (0, false),
        };
        Ok(Some(self.arena.alloc(Node::Limit(LimitClause {
            offset,
            count,
            has_offset,
        }))))
    }

    fn lower_expr(&mut self, expr: sql::Expr) -> Result<NodeId> {
        let node = match expr {
            sql::Expr::Identifier(ident) => Node::ColumnName(ColumnName {
                qualifier: None,
                column: ident.value,
            }),
            sql::Expr::CompoundIdentifier(mut idents) => {
                let column = idents
                    .pop()
                    .map(|ident| ident.value)
                    .ok_or_else(|| ProxyError::ParseContext("empty column name".to_string()))?;
                let qualifier = idents.pop().map(|ident| ident.value);
                Node::ColumnName(ColumnName { qualifier, column })
            }
            sql::Expr::Value(value) => return self.lower_value(value),
            sql::Expr::BinaryOp { left, op, right } => {
                let mapped = match op {
                    sql::BinaryOperator::And => Some(BinOp::And),
                    sql::BinaryOperator::Or => Some(BinOp::Or),
                    sql::BinaryOperator::Eq => Some(BinOp::Eq),
                    sql::BinaryOperator::NotEq => Some(BinOp::NotEq),
                    sql::BinaryOperator::Lt => Some(BinOp::Lt),
                    sql::BinaryOperator::LtEq => Some(BinOp::LtEq),
                    sql::BinaryOperator::Gt => Some(BinOp::Gt),
                    sql::BinaryOperator::GtEq => Some(BinOp::GtEq),
                    sql::BinaryOperator::Plus => Some(BinOp::Plus),
                    sql::BinaryOperator::Minus => Some(BinOp::Minus),
                    sql::BinaryOperator::Multiply => Some(BinOp::Multiply),
                    sql::BinaryOperator::Divide => Some(BinOp::Divide),
                    sql::BinaryOperator::Modulo => Some(BinOp::Modulo),
                    _ => None,
                };
                match mapped {
                    Some(op) => {
                        let left = self.lower_expr(*left)?;
                        let right = self.lower_expr(*right)?;
                        Node::BinaryOp { op, left, right }
                    }
                    None => {
                        return Ok(self.verbatim(format!(
                            "{}",
                            sql::Expr::BinaryOp { left, op, right }
                        )))
                    }
                }
            }
            sql::Expr::UnaryOp { op, expr } => match op {
                sql::UnaryOperator::Not => {
                    let operand = self.lower_expr(*expr)?;
                    Node::UnaryOp {
                        op: UnOp::Not,
                        operand,
                    }
                }
                sql::UnaryOperator::Minus => {
                    let operand = self.lower_expr(*expr)?;
                    Node::UnaryOp {
                        op: UnOp::Neg,
                        operand,
                    }
                }
                sql::UnaryOperator::Plus => return self.lower_expr(*expr),
                other => {
                    return Ok(self.verbatim(format!("{}", sql::Expr::UnaryOp { op: other, expr })))
                }
            },
            sql::Expr::Nested(inner) => {
                let inner = self.lower_expr(*inner)?;
                Node::Paren(inner)
            }
            sql::Expr::InList {
                expr,
                list,
                negated,
            } => {
                let expr = self.lower_expr(*expr)?;
                let list = list
                    .into_iter()
                    .map(|e| self.lower_expr(e))
                    .collect::<Result<Vec<_>>>()?;
                Node::PatternIn(PatternIn {
                    expr,
                    list,
                    negated,
                })
            }
            sql::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let expr = self.lower_expr(*expr)?;
                let low = self.lower_expr(*low)?;
                let high = self.lower_expr(*high)?;
                Node::Between(Between {
                    expr,
                    low,
                    high,
                    negated,
                })
            }
            other => return Ok(self.verbatim(format!("{other}"))),
        };
        Ok(self.arena.alloc(node))
    }

    fn lower_value(&mut self, value: sql::Value) -> Result<NodeId> {
        let node = match value {
            sql::Value::Number(text, _) => {
                let v = if text.contains(['.', 'e', 'E']) {
                    Value::make_trusted(MySqlType::Float64, text.into_bytes())
                } else {
                    Value::new_integral(&text)
                        .map_err(|_| ProxyError::ParseContext(format!("bad number: {text}")))?
                };
                Node::Literal(v)
            }
            sql::Value::SingleQuotedString(s) | sql::Value::DoubleQuotedString(s) => {
                Node::Literal(Value::new_varchar(s))
            }
            sql::Value::Boolean(b) => Node::Literal(Value::new_int64(b as i64)),
            sql::Value::Null => Node::Literal(Value::NULL),
            sql::Value::Placeholder(_) => {
                let index = self.binds;
                self.binds += 1;
                Node::BindParam(index)
            }
            other => return Ok(self.verbatim(format!("{other}"))),
        };
        Ok(self.arena.alloc(node))
    }

    /// Keeps an unmodeled expression as text. Placeholders inside it still
    /// occupy bind slots, so positional binding stays aligned.
    fn verbatim(&mut self, text: String) -> NodeId {
        self.binds += text.bytes().filter(|&b| b == b'?').count();
        self.arena.alloc(Node::Verbatim(text))
    }
}

fn object_name_string(name: &sql::ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn literal_u64(expr: &sql::Expr) -> Result<u64> {
    match expr {
        sql::Expr::Value(sql::Value::Number(text, _)) => text
            .parse::<u64>()
            .map_err(|_| ProxyError::ParseContext(format!("bad limit value: {text}"))),
        other => Err(ProxyError::ParseContext(format!(
            "LIMIT requires literal values, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_of(stmt: &ParsedStatement) -> &SelectStmt {
        match stmt.arena.node(stmt.root) {
            Node::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let stmt = SqlParser::parse_one("SELECT * FROM orders WHERE user_id = 7").unwrap();
        let select = select_of(&stmt);
        assert_eq!(select.fields.len(), 1);
        assert_eq!(select.from.len(), 1);
        assert!(select.where_clause.is_some());
        assert_eq!(stmt.bind_count, 0);
    }

    #[test]
    fn test_parse_table_source() {
        let stmt = SqlParser::parse_one("SELECT * FROM shop.orders o").unwrap();
        let select = select_of(&stmt);
        match stmt.arena.node(select.from[0].table) {
            Node::TableSource(t) => {
                assert_eq!(t.schema.as_deref(), Some("shop"));
                assert_eq!(t.table, "orders");
                assert_eq!(t.alias.as_deref(), Some("o"));
                assert_eq!(t.binding_name(), "o");
            }
            other => panic!("expected table source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bind_params_are_ordered() {
        let stmt =
            SqlParser::parse_one("SELECT * FROM orders WHERE user_id = ? AND amount > ?").unwrap();
        assert_eq!(stmt.bind_count, 2);
    }

    #[test]
    fn test_parse_in_and_between() {
        let stmt = SqlParser::parse_one(
            "SELECT * FROM orders WHERE user_id IN (1, 2, 5) AND amount BETWEEN 10 AND 20",
        )
        .unwrap();
        let select = select_of(&stmt);
        let root = select.where_clause.unwrap();
        match stmt.arena.node(root) {
            Node::BinaryOp {
                op: BinOp::And,
                left,
                right,
            } => {
                assert!(matches!(stmt.arena.node(*left), Node::PatternIn(_)));
                assert!(matches!(stmt.arena.node(*right), Node::Between(_)));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_limit_offset() {
        let stmt = SqlParser::parse_one("SELECT * FROM orders LIMIT 10, 5").unwrap();
        let select = select_of(&stmt);
        match stmt.arena.node(select.limit.unwrap()) {
            Node::Limit(l) => {
                assert_eq!(l.offset, 10);
                assert_eq!(l.count, 5);
                assert!(l.has_offset);
            }
            other => panic!("expected limit, got {other:?}"),
        }

        let stmt = SqlParser::parse_one("SELECT * FROM orders LIMIT 5").unwrap();
        let select = select_of(&stmt);
        match stmt.arena.node(select.limit.unwrap()) {
            Node::Limit(l) => {
                assert_eq!(l.count, 5);
                assert!(!l.has_offset);
            }
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert() {
        let stmt =
            SqlParser::parse_one("INSERT INTO orders (id, user_id) VALUES (1, 7)").unwrap();
        match stmt.arena.node(stmt.root) {
            Node::Insert(insert) => {
                assert_eq!(insert.columns, vec!["id", "user_id"]);
                assert_eq!(insert.rows.len(), 1);
                assert_eq!(insert.rows[0].len(), 2);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_update_and_delete() {
        let stmt =
            SqlParser::parse_one("UPDATE orders SET amount = 5 WHERE user_id = 7").unwrap();
        match stmt.arena.node(stmt.root) {
            Node::Update(update) => {
                assert_eq!(update.assignments.len(), 1);
                assert_eq!(update.assignments[0].0, "amount");
                assert!(update.where_clause.is_some());
            }
            other => panic!("expected update, got {other:?}"),
        }

        let stmt = SqlParser::parse_one("DELETE FROM orders WHERE user_id = 7").unwrap();
        match stmt.arena.node(stmt.root) {
            Node::Delete(delete) => assert!(delete.where_clause.is_some()),
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_union() {
        let stmt = SqlParser::parse_one(
            "SELECT id FROM orders WHERE user_id = 1 UNION ALL SELECT id FROM orders WHERE user_id = 2",
        )
        .unwrap();
        match stmt.arena.node(stmt.root) {
            Node::Union(union) => {
                assert_eq!(union.selects.len(), 2);
                assert!(union.all);
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn test_unmodeled_expression_is_verbatim() {
        let stmt =
            SqlParser::parse_one("SELECT COUNT(*) FROM orders WHERE user_id = 7").unwrap();
        let select = select_of(&stmt);
        match stmt.arena.node(select.fields[0]) {
            Node::FieldExpr(f) => {
                assert!(matches!(stmt.arena.node(f.expr), Node::Verbatim(_)))
            }
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_statement() {
        assert!(SqlParser::parse_one("CREATE TABLE t (a INT)").is_err());
    }
}
