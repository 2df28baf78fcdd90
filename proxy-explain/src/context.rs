// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The seam between writers and the generation runtime
//!
//! Writers are pure over `(explain, cursor)`: the cursor tells them where
//! the iteration currently points, and they render that shard's variant.
//! The generation runtime implements this trait; tests implement it with a
//! fixed position.

use proxy_mysql::Value;

pub trait ShardCursor {
    /// Data source of the current iteration position.
    fn current_data_source(&self) -> &str;

    /// The session's default data source. Table writers emit a schema
    /// qualifier when the target differs from it.
    fn default_data_source(&self) -> &str;

    /// Physical table for a logical table at the current position.
    fn physical_table(&self, logical_table: &str) -> Option<&str>;

    /// IN-list elements routable to the current shard of
    /// `(logical_table, column)`. `None` means the list was not
    /// partitioned; an empty slice means this shard would receive no
    /// elements.
    fn in_values(&self, logical_table: &str, column: &str) -> Option<&[Value]>;
}
