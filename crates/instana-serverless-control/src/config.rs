// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ControlError;

const DEFAULT_TEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BACKEND_PORT: u16 = 8443;
const DEFAULT_DOWNSTREAM_DUMMY_PORT: u16 = 3456;
const DEFAULT_METADATA_MOCK_PORT: u16 = 1604;
const DEFAULT_PROXY_PORT: u16 = 3128;
const DEFAULT_EXTENSION_PORT: u16 = 7365;

/// Harness-wide configuration: the ports the stub processes bind, the overall
/// test timeout, and where the stub binaries live.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub timeout: Duration,
    pub backend_port: u16,
    pub downstream_dummy_port: u16,
    pub metadata_mock_port: u16,
    pub proxy_port: u16,
    pub extension_port: u16,
    /// Directory holding the stub binaries. When unset, they are resolved
    /// next to the current test executable (the cargo target directory).
    pub stub_bin_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS),
            backend_port: DEFAULT_BACKEND_PORT,
            downstream_dummy_port: DEFAULT_DOWNSTREAM_DUMMY_PORT,
            metadata_mock_port: DEFAULT_METADATA_MOCK_PORT,
            proxy_port: DEFAULT_PROXY_PORT,
            extension_port: DEFAULT_EXTENSION_PORT,
            stub_bin_dir: None,
        }
    }
}

impl HarnessConfig {
    /// Creates the configuration from environment variables.
    pub fn from_env() -> Result<Self, ControlError> {
        let timeout = env::var("TEST_TIMEOUT")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS));

        let config = Self {
            timeout,
            backend_port: port_from_env("BACKEND_PORT", DEFAULT_BACKEND_PORT),
            downstream_dummy_port: port_from_env(
                "DOWNSTREAM_DUMMY_PORT",
                DEFAULT_DOWNSTREAM_DUMMY_PORT,
            ),
            metadata_mock_port: port_from_env("METADATA_MOCK_PORT", DEFAULT_METADATA_MOCK_PORT),
            proxy_port: port_from_env("PROXY_PORT", DEFAULT_PROXY_PORT),
            extension_port: port_from_env("EXTENSION_PORT", DEFAULT_EXTENSION_PORT),
            stub_bin_dir: env::var("STUB_BIN_DIR").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.timeout.is_zero() {
            return Err(ControlError::InvalidConfig(
                "The test timeout must be greater than 0".to_string(),
            ));
        }
        let ports = [
            self.backend_port,
            self.downstream_dummy_port,
            self.metadata_mock_port,
            self.proxy_port,
            self.extension_port,
        ];
        if ports.contains(&0) {
            return Err(ControlError::InvalidConfig(
                "All stub ports must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL of the backend stub's acceptor mount, as the monitored
    /// process and the backend client use it.
    pub fn backend_base_url(&self) -> String {
        format!("http://127.0.0.1:{}/serverless", self.backend_port)
    }

    pub fn extension_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.extension_port)
    }

    pub fn downstream_dummy_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.downstream_dummy_port)
    }

    pub fn metadata_mock_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.metadata_mock_port)
    }

    pub fn proxy_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.proxy_port)
    }

    /// A command for one of the stub binaries.
    pub fn stub_command(&self, bin_name: &str) -> Command {
        let path = match &self.stub_bin_dir {
            Some(dir) => dir.join(bin_name),
            None => default_bin_dir().join(bin_name),
        };
        Command::new(path)
    }
}

/// Test executables run from `target/<profile>/deps`, the stub binaries land
/// one level up.
fn default_bin_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| {
            let mut dir = exe.parent()?.to_path_buf();
            if dir.ends_with("deps") {
                dir.pop();
            }
            Some(dir)
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

fn port_from_env(var: &str, default: u16) -> u16 {
    env::var(var)
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(default)
}
