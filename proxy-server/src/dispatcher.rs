// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The backend seam
//!
//! The core never talks to backends directly; it hands rewritten SQL to a
//! [`BackendDispatcher`]. Dispatch is assumed idempotent-safe only for
//! reads. The mock implementation records every command and serves canned
//! results, which is what the pipeline tests run against.

use async_trait::async_trait;
use parking_lot::Mutex;
use proxy_common::{ProxyError, Result};
use proxy_mysql::resultset::QueryResult;
use proxy_mysql::BindVariable;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation token shared by one connection's in-flight
/// work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
pub trait BackendDispatcher: Send + Sync {
    /// Executes one rewritten SQL on a named data source.
    async fn dispatch(
        &self,
        data_source: &str,
        sql: &str,
        binds: &[BindVariable],
        cancel: &CancelFlag,
    ) -> Result<QueryResult>;
}

/// Records dispatched commands and returns configured responses.
#[derive(Default)]
pub struct MockDispatcher {
    dispatched: Mutex<Vec<(String, String)>>,
    responses: Mutex<HashMap<String, QueryResult>>,
    failures: Mutex<HashMap<String, (u16, String)>>,
}

impl MockDispatcher {
    pub fn new() -> MockDispatcher {
        MockDispatcher::default()
    }

    /// Canned result for every command sent to `data_source`.
    pub fn respond(&self, data_source: &str, result: QueryResult) {
        self.responses
            .lock()
            .insert(data_source.to_string(), result);
    }

    /// Makes every command to `data_source` fail.
    pub fn fail(&self, data_source: &str, code: u16, message: &str) {
        self.failures
            .lock()
            .insert(data_source.to_string(), (code, message.to_string()));
    }

    pub fn dispatched(&self) -> Vec<(String, String)> {
        self.dispatched.lock().clone()
    }
}

#[async_trait]
impl BackendDispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        data_source: &str,
        sql: &str,
        _binds: &[BindVariable],
        cancel: &CancelFlag,
    ) -> Result<QueryResult> {
        cancel.check()?;
        self.dispatched
            .lock()
            .push((data_source.to_string(), sql.to_string()));
        if let Some((code, message)) = self.failures.lock().get(data_source) {
            return Err(ProxyError::BackendFailure {
                data_source: data_source.to_string(),
                code: *code,
                message: message.clone(),
            });
        }
        Ok(self
            .responses
            .lock()
            .get(data_source)
            .cloned()
            .unwrap_or(QueryResult::Ok {
                affected_rows: 0,
                last_insert_id: 0,
            }))
    }
}
