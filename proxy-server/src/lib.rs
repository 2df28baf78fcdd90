// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Proxy server assembly
//!
//! Ties the protocol layer to the explain/generate pipeline: per-connection
//! sessions and prepared statements, the backend dispatcher seam, parallel
//! scatter with cooperative cancellation, and the result reducer.

pub mod dispatcher;
pub mod executor;
pub mod scatter;
pub mod server;
pub mod session;
pub mod stmt;

pub use dispatcher::{BackendDispatcher, CancelFlag, MockDispatcher};
pub use executor::Executor;
pub use server::ProxyServer;
pub use session::{DbSession, Session, TransactionMode};
pub use stmt::{PreparedStatement, StmtRegistry};
