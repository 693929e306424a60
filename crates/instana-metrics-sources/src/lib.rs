// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Polling data sources for snapshot and metrics collection.
//!
//! A data source knows how to fetch one raw payload (an HTTP endpoint, the
//! local process table); the poller runs it on a fixed interval, keeps the
//! most recent payload, and signals the first successful refresh so
//! downstream processors know when the source is usable.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod data_source;
pub mod http_source;
pub mod process_source;

pub use data_source::{DataPoller, DataSource, DataSourceError};
pub use http_source::HttpDataSource;
pub use process_source::{ProcessSnapshotDataSource, SnapshotAttributes};
