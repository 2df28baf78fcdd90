// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The per-command pipeline
//!
//! Session-control statements (SET, BEGIN, COMMIT, SAVEPOINT, SHOW) route
//! on their leading keyword without a parse. Everything else goes through
//! parse → explain → generate → scatter → reduce.

use crate::dispatcher::{BackendDispatcher, CancelFlag};
use crate::scatter::{execute_scatter, reduce_results};
use crate::session::{DbSession, Session};
use crate::stmt::PreparedStatement;
use proxy_analysis::SqlParser;
use proxy_catalog::Catalog;
use proxy_common::Result;
use proxy_explain::SqlExplain;
use proxy_gen::{generate_sql, SqlGenUsage};
use proxy_mysql::resultset::{Field, QueryResult, ResultSet};
use proxy_mysql::{BindVariable, MySqlType, Value};
use std::sync::Arc;
use tracing::debug;

const OK: QueryResult = QueryResult::Ok {
    affected_rows: 0,
    last_insert_id: 0,
};

pub struct Executor {
    catalog: Arc<Catalog>,
    dispatcher: Arc<dyn BackendDispatcher>,
    default_data_source: String,
}

impl Executor {
    pub fn new(
        catalog: Arc<Catalog>,
        dispatcher: Arc<dyn BackendDispatcher>,
        default_data_source: String,
    ) -> Executor {
        Executor {
            catalog,
            dispatcher,
            default_data_source,
        }
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        session: &mut Session,
        cancel: &CancelFlag,
    ) -> Result<QueryResult> {
        let trimmed = sql.trim().trim_end_matches(';');
        if let Some(result) = self.session_statement(trimmed, session, cancel).await {
            return result;
        }

        let stmt = SqlParser::parse_one(trimmed)?;
        let explain = SqlExplain::new(
            stmt,
            &self.catalog.snapshot(),
            session.current_schema.as_deref(),
        )?;
        self.run_explained(&explain, trimmed, &[], session, cancel)
            .await
    }

    pub async fn execute_prepared(
        &self,
        stmt: &PreparedStatement,
        binds: &[BindVariable],
        session: &mut Session,
        cancel: &CancelFlag,
    ) -> Result<QueryResult> {
        self.run_explained(&stmt.explain, &stmt.sql, binds, session, cancel)
            .await
    }

    async fn run_explained(
        &self,
        explain: &SqlExplain,
        original_sql: &str,
        binds: &[BindVariable],
        session: &mut Session,
        cancel: &CancelFlag,
    ) -> Result<QueryResult> {
        let gen = generate_sql(&self.default_data_source, explain, binds)?;
        let result = match gen.usage {
            SqlGenUsage::Raw => {
                debug!(data_source = %self.default_data_source, "passthrough dispatch");
                if session.in_transaction {
                    track_shard_session(session, &self.default_data_source);
                }
                self.dispatcher
                    .dispatch(&self.default_data_source, original_sql, binds, cancel)
                    .await?
            }
            SqlGenUsage::Shard => {
                if session.in_transaction {
                    for command in &gen.commands {
                        track_shard_session(session, &command.data_source);
                    }
                }
                let results =
                    execute_scatter(self.dispatcher.clone(), &gen.commands, cancel).await?;
                reduce_results(results, &explain.order_by_columns(), explain.limit_lookup())?
            }
        };

        match &result {
            QueryResult::Ok {
                affected_rows,
                last_insert_id,
            } => {
                session.row_count = *affected_rows as i64;
                if *last_insert_id != 0 {
                    session.last_insert_id = *last_insert_id;
                }
            }
            QueryResult::ResultSet(rs) => {
                session.found_rows = rs.row_count() as u64;
                session.row_count = -1;
            }
        }
        Ok(result)
    }

    /// Handles statements that act on the session instead of the data.
    async fn session_statement(
        &self,
        sql: &str,
        session: &mut Session,
        cancel: &CancelFlag,
    ) -> Option<Result<QueryResult>> {
        let lower = sql.to_lowercase();
        if lower == "begin" || lower.starts_with("start transaction") {
            session.begin_transaction();
            return Some(Ok(OK));
        }
        if lower == "commit" || lower == "rollback" {
            let verb = if lower == "commit" { "COMMIT" } else { "ROLLBACK" };
            let result = self.finish_transaction(session, verb, cancel).await;
            session.end_transaction();
            return Some(result.map(|_| OK));
        }
        if let Some(name) = lower.strip_prefix("savepoint ") {
            session.add_savepoint(name.trim());
            return Some(Ok(OK));
        }
        if let Some(name) = lower.strip_prefix("release savepoint ") {
            session.release_savepoint(name.trim());
            return Some(Ok(OK));
        }
        if lower.starts_with("set ") {
            return Some(self.apply_set(sql, session));
        }
        if lower.starts_with("show ") {
            return Some(Ok(OK));
        }
        if lower.starts_with("select @@") {
            let variable = sql[9..].trim().to_string();
            let value = session
                .system_variables
                .get(&variable.to_lowercase())
                .cloned()
                .unwrap_or_default();
            let mut rs = ResultSet::new(vec![Field::new(
                format!("@@{variable}"),
                MySqlType::VarChar,
            )]);
            rs.add_row(vec![Value::new_varchar(value)]);
            return Some(Ok(QueryResult::ResultSet(rs)));
        }
        None
    }

    /// Sends COMMIT/ROLLBACK to every tracked shard session in pre → main
    /// → post order.
    async fn finish_transaction(
        &self,
        session: &Session,
        verb: &str,
        cancel: &CancelFlag,
    ) -> Result<()> {
        for db_session in session.commit_order() {
            self.dispatcher
                .dispatch(&db_session.data_source, verb, &[], cancel)
                .await?;
        }
        Ok(())
    }

    fn apply_set(&self, sql: &str, session: &mut Session) -> Result<QueryResult> {
        let assignment = &sql[4..];
        let Some((name, value)) = assignment.split_once('=') else {
            return Ok(OK);
        };
        let name = name.trim().trim_end_matches(":").trim();
        let value = value.trim();

        if let Some(user_var) = name.strip_prefix('@').filter(|n| !n.starts_with('@')) {
            let parsed = parse_set_value(value);
            session
                .user_defined_variables
                .insert(user_var.to_lowercase(), BindVariable::from_value(parsed));
            return Ok(OK);
        }

        let name = name.trim_start_matches("@@").trim_start_matches("session.");
        if name.eq_ignore_ascii_case("autocommit") {
            session.autocommit = matches!(value, "1" | "on" | "ON" | "true");
            return Ok(OK);
        }
        session
            .system_variables
            .insert(name.to_lowercase(), value.trim_matches('\'').to_string());
        Ok(OK)
    }
}

fn track_shard_session(session: &mut Session, data_source: &str) {
    if session
        .shard_sessions
        .iter()
        .any(|s| s.data_source == data_source)
    {
        return;
    }
    session.shard_sessions.push(DbSession {
        data_source: data_source.to_string(),
        transaction_id: 0,
        reserved_id: 0,
    });
}

fn parse_set_value(value: &str) -> Value {
    let unquoted = value.trim_matches('\'');
    if unquoted != value {
        return Value::new_varchar(unquoted);
    }
    Value::new_integral(value).unwrap_or_else(|_| Value::new_varchar(value))
}
