// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock server processes used by the serverless integration test suites.
//!
//! Each stub is a small HTTP server that stands in for an external
//! collaborator of the in-process agent: the telemetry backend, a downstream
//! HTTP service, the container metadata endpoint, an HTTP forward proxy, and
//! the Lambda extension. The stubs are started as child processes by the test
//! control layer and announce readiness with a sentinel line on stdout.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod backend;
pub mod downstream;
pub mod http;
pub mod ipc;
pub mod metadata;
pub mod proxy;
pub mod store;

use std::env;

use tracing_subscriber::EnvFilter;

/// Initializes logging for a stub binary.
///
/// The level comes from `INSTANA_LOG_LEVEL` (default `info`); transport-layer
/// crates are silenced so stub logs stay focused on the harness traffic.
pub fn init_logging() {
    let log_level = env::var("INSTANA_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    // A second initialization in the same process is harmless for the stubs.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Reads a port from the environment, falling back to the given default.
pub fn port_from_env(var: &str, default: u16) -> u16 {
    env::var(var)
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Reads a boolean flag from the environment; only the literal `true` counts.
pub fn flag_from_env(var: &str) -> bool {
    env::var(var).map(|val| val == "true").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_from_env_falls_back_to_default() {
        assert_eq!(port_from_env("NO_SUCH_PORT_VARIABLE", 8443), 8443);
    }

    #[test]
    fn flag_from_env_only_accepts_true() {
        std::env::set_var("STUB_TEST_FLAG", "yes");
        assert!(!flag_from_env("STUB_TEST_FLAG"));
        std::env::set_var("STUB_TEST_FLAG", "true");
        assert!(flag_from_env("STUB_TEST_FLAG"));
        std::env::remove_var("STUB_TEST_FLAG");
    }
}
