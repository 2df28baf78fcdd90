// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Sharding explain and rewrite engine
//!
//! [`SqlExplain`] walks a parsed statement once: it resolves sharded tables
//! against a catalog snapshot, extracts sharding predicates into a deferred
//! condition tree, and records rewrite bindings (node id → writer) for the
//! generation runtime to replay per shard.

pub mod condition;
pub mod context;
pub mod explain;
pub mod rewrite;

pub use condition::{Condition, ConditionTree, Operand};
pub use context::ShardCursor;
pub use explain::{LimitLookup, SqlExplain};
