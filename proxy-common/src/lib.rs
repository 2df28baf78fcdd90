// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Common foundational types for the sharding proxy
//!
//! This crate provides:
//! - Error types and result handling
//! - Configuration management (proxy settings + sharding rules)
//! - Version constants

pub mod config;
pub mod error;
pub mod version;

pub use config::{Config, ShardingRuleConfig, StrategyKind, TableRuleConfig};
pub use error::{ProxyError, Result};
