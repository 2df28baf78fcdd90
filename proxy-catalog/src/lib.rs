// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Sharding catalog
//!
//! Maps `(schema, table)` to a [`ShardingTable`] descriptor and evaluates
//! sharding strategies over extracted predicate values. The catalog is
//! copy-on-write: readers take an immutable snapshot and never observe a
//! half-applied reload.

pub mod catalog;
pub mod strategy;
pub mod table;
pub mod values;

pub use catalog::{Catalog, CatalogSnapshot};
pub use strategy::ShardingStrategy;
pub use table::{ShardCoord, ShardingTable};
pub use values::{ShardingValues, ValueRange};
