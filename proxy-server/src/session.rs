// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Per-connection session state
//!
//! Pre-sessions commit before the main shard sessions, post-sessions after.
//! `Clone` must produce a fully independent snapshot; plan caching and
//! speculative re-planning rely on it.

use proxy_mysql::constants::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};
use proxy_mysql::BindVariable;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    #[default]
    Single,
    Multi,
    TwoPc,
}

/// Transaction handle on one backend data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSession {
    pub data_source: String,
    pub transaction_id: u64,
    pub reserved_id: u64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub in_transaction: bool,
    pub autocommit: bool,
    pub shard_sessions: Vec<DbSession>,
    pub pre_sessions: Vec<DbSession>,
    pub post_sessions: Vec<DbSession>,
    /// The single shard holding an advisory lock for GET_LOCK.
    pub lock_session: Option<DbSession>,
    pub last_lock_heartbeat: i64,
    pub transaction_mode: TransactionMode,
    pub savepoints: Vec<String>,
    pub user_defined_variables: HashMap<String, BindVariable>,
    pub system_variables: HashMap<String, String>,
    pub last_insert_id: u64,
    pub found_rows: u64,
    pub row_count: i64,
    pub warnings: Vec<String>,
    pub in_reserved_conn: bool,
    pub target_string: String,
    pub session_uuid: String,
    pub current_schema: Option<String>,
}

impl Session {
    pub fn new(default_schema: Option<String>) -> Session {
        Session {
            in_transaction: false,
            autocommit: true,
            shard_sessions: Vec::new(),
            pre_sessions: Vec::new(),
            post_sessions: Vec::new(),
            lock_session: None,
            last_lock_heartbeat: 0,
            transaction_mode: TransactionMode::default(),
            savepoints: Vec::new(),
            user_defined_variables: HashMap::new(),
            system_variables: HashMap::new(),
            last_insert_id: 0,
            found_rows: 0,
            row_count: -1,
            warnings: Vec::new(),
            in_reserved_conn: false,
            target_string: String::new(),
            session_uuid: Uuid::new_v4().to_string(),
            current_schema: default_schema,
        }
    }

    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
        self.savepoints.clear();
    }

    /// Ends the transaction and clears every per-transaction handle.
    pub fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.shard_sessions.clear();
        self.pre_sessions.clear();
        self.post_sessions.clear();
        self.savepoints.clear();
    }

    pub fn add_savepoint(&mut self, name: &str) {
        self.savepoints.push(name.to_string());
    }

    pub fn release_savepoint(&mut self, name: &str) -> bool {
        match self.savepoints.iter().rposition(|s| s == name) {
            Some(index) => {
                self.savepoints.truncate(index);
                true
            }
            None => false,
        }
    }

    /// Commit order across session groups: pre first, main shards, post
    /// last.
    pub fn commit_order(&self) -> impl Iterator<Item = &DbSession> {
        self.pre_sessions
            .iter()
            .chain(self.shard_sessions.iter())
            .chain(self.post_sessions.iter())
    }

    pub fn status_flags(&self) -> u16 {
        let mut flags = 0;
        if self.autocommit {
            flags |= SERVER_STATUS_AUTOCOMMIT;
        }
        if self.in_transaction {
            flags |= SERVER_STATUS_IN_TRANS;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_mysql::Value;

    fn populated_session() -> Session {
        let mut session = Session::new(Some("shop".to_string()));
        session.begin_transaction();
        session.shard_sessions.push(DbSession {
            data_source: "ds0".to_string(),
            transaction_id: 7,
            reserved_id: 0,
        });
        session.pre_sessions.push(DbSession {
            data_source: "ds1".to_string(),
            transaction_id: 8,
            reserved_id: 0,
        });
        session.post_sessions.push(DbSession {
            data_source: "ds0".to_string(),
            transaction_id: 9,
            reserved_id: 0,
        });
        session.add_savepoint("sp1");
        session
            .user_defined_variables
            .insert("x".to_string(), BindVariable::from_value(Value::new_int64(1)));
        session
            .system_variables
            .insert("sql_mode".to_string(), "STRICT_TRANS_TABLES".to_string());
        session.warnings.push("w".to_string());
        session
    }

    #[test]
    fn test_clone_is_deep() {
        let original = populated_session();
        let mut cloned = original.clone();

        cloned.shard_sessions[0].transaction_id = 99;
        cloned.savepoints.push("sp2".to_string());
        cloned
            .user_defined_variables
            .insert("y".to_string(), BindVariable::from_value(Value::new_int64(2)));
        cloned
            .system_variables
            .insert("sql_mode".to_string(), "".to_string());
        cloned.warnings.clear();

        assert_eq!(original.shard_sessions[0].transaction_id, 7);
        assert_eq!(original.savepoints, vec!["sp1"]);
        assert_eq!(original.user_defined_variables.len(), 1);
        assert_eq!(
            original.system_variables["sql_mode"],
            "STRICT_TRANS_TABLES"
        );
        assert_eq!(original.warnings.len(), 1);
        assert_eq!(original.session_uuid, cloned.session_uuid);
    }

    #[test]
    fn test_commit_order_pre_main_post() {
        let session = populated_session();
        let order: Vec<&str> = session
            .commit_order()
            .map(|s| s.data_source.as_str())
            .collect();
        assert_eq!(order, vec!["ds1", "ds0", "ds0"]);
        let ids: Vec<u64> = session.commit_order().map(|s| s.transaction_id).collect();
        assert_eq!(ids, vec![8, 7, 9]);
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut session = Session::new(None);
        assert!(!session.in_transaction);
        assert_eq!(session.status_flags(), SERVER_STATUS_AUTOCOMMIT);

        session.begin_transaction();
        assert!(session.status_flags() & SERVER_STATUS_IN_TRANS != 0);

        session.end_transaction();
        assert!(!session.in_transaction);
        assert!(session.shard_sessions.is_empty());
        assert!(session.savepoints.is_empty());
    }

    #[test]
    fn test_savepoint_release() {
        let mut session = Session::new(None);
        session.add_savepoint("a");
        session.add_savepoint("b");
        session.add_savepoint("c");
        assert!(session.release_savepoint("b"));
        assert_eq!(session.savepoints, vec!["a"]);
        assert!(!session.release_savepoint("zzz"));
    }
}
