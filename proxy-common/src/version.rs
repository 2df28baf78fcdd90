// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVER_VERSION: &str = "5.7.0-sharding";
