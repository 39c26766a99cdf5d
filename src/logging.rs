// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Logging Setup
//!
//! Tracing subscriber initialization for the binaries. Libraries embedding
//! this crate install their own subscriber and skip this module.

/// Initialize tracing for the process.
///
/// Uses a simple `with_max_level` configuration based on `default_level`.
/// Calls `try_init` so tests can call this repeatedly without panicking.
pub fn init(default_level: &str) {
    let lvl = match default_level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}
