// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-lifecycle control for serverless integration tests.
//!
//! A test run forks the monitored process plus a set of stub processes
//! (backend mock, downstream dummy, metadata mock, proxy, extension),
//! coordinates startup ordering via stdout sentinel lines, queries the
//! backend stub over HTTP while the test runs, and tears everything down
//! afterwards.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod backend_client;
pub mod child;
pub mod config;
pub mod control;
pub mod error;
pub mod runtime;

pub use backend_client::BackendClient;
pub use child::{ChildHandle, ProcessSpec};
pub use config::HarnessConfig;
pub use control::{BackendMode, ControlOptions, ControlState, ServerlessControl};
pub use error::ControlError;
pub use runtime::{
    AzureRuntime, CloudRunRuntime, FargateRuntime, LambdaRuntime, MonitoredRuntime,
    RuntimeContext,
};
