// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! SQL generation runtime
//!
//! Takes an explain result plus bind variables, enumerates the Cartesian
//! product of every sharded table's destination coordinates, and renders
//! one rewritten SQL per target shard.

pub mod gen;
pub mod runtime;

pub use gen::{generate_sql, ScatterCommand, SqlGenResult, SqlGenUsage};
pub use runtime::GenRuntime;
