// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The poller runtime shared by all data sources.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One source of raw snapshot or metrics data.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    fn refresh_interval(&self) -> Duration;

    async fn fetch(&self) -> anyhow::Result<Value>;
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("The data source has not refreshed within {0:?}.")]
    FirstRefreshTimeout(Duration),
}

struct PollerState {
    raw: RwLock<Option<Value>>,
    last_refresh: RwLock<Option<Instant>>,
    first_refresh_tx: watch::Sender<bool>,
}

impl PollerState {
    fn record_refresh(&self, value: Value) {
        if let Ok(mut raw) = self.raw.write() {
            *raw = Some(value);
        }
        if let Ok(mut last_refresh) = self.last_refresh.write() {
            *last_refresh = Some(Instant::now());
        }
        if !*self.first_refresh_tx.borrow() {
            let _ = self.first_refresh_tx.send(true);
        }
    }

    fn clear(&self) {
        if let Ok(mut raw) = self.raw.write() {
            *raw = None;
        }
        if let Ok(mut last_refresh) = self.last_refresh.write() {
            *last_refresh = None;
        }
        let _ = self.first_refresh_tx.send(false);
    }
}

/// Runs a [`DataSource`] on its refresh interval.
///
/// All state is owned by the poller instance and injected nowhere else, so
/// multiple pollers (or test runs) never alias each other's data.
pub struct DataPoller {
    source: Arc<dyn DataSource>,
    state: Arc<PollerState>,
    first_refresh_rx: watch::Receiver<bool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl DataPoller {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        let (first_refresh_tx, first_refresh_rx) = watch::channel(false);
        DataPoller {
            source,
            state: Arc::new(PollerState {
                raw: RwLock::new(None),
                last_refresh: RwLock::new(None),
                first_refresh_tx,
            }),
            first_refresh_rx,
            cancel: Mutex::new(None),
        }
    }

    /// Starts the poll loop. The first fetch happens immediately, subsequent
    /// fetches on the source's refresh interval. Activating an already
    /// active poller is reported and ignored.
    pub fn activate(&self) {
        let mut cancel_slot = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = cancel_slot.as_ref() {
            if !existing.is_cancelled() {
                warn!("Data source is already active");
                return;
            }
        }

        let cancel = CancellationToken::new();
        *cancel_slot = Some(cancel.clone());

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(source.refresh_interval());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match source.fetch().await {
                            Ok(value) => state.record_refresh(value),
                            Err(e) => debug!("Data source refresh failed: {e}"),
                        }
                    }
                }
            }
        });
    }

    /// Stops the poll loop. The collected data stays available.
    pub fn deactivate(&self) {
        let cancel_slot = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cancel) = cancel_slot.as_ref() {
            cancel.cancel();
        }
    }

    /// Drops collected data and the first-refresh marker, as between two
    /// test cases sharing one poller.
    pub fn reset(&self) {
        self.state.clear();
    }

    pub fn has_refreshed_at_least_once(&self) -> bool {
        self.state
            .last_refresh
            .read()
            .map(|last_refresh| last_refresh.is_some())
            .unwrap_or(false)
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.state
            .last_refresh
            .read()
            .map(|last_refresh| *last_refresh)
            .unwrap_or(None)
    }

    /// The most recent raw payload.
    pub fn raw_data(&self) -> Option<Value> {
        self.state
            .raw
            .read()
            .map(|raw| raw.clone())
            .unwrap_or(None)
    }

    /// Awaits the first successful refresh, bounded by `timeout`.
    pub async fn wait_for_first_refresh(&self, timeout: Duration) -> Result<(), DataSourceError> {
        let mut first_refresh_rx = self.first_refresh_rx.clone();
        let outcome = tokio::time::timeout(timeout, async move {
            loop {
                if *first_refresh_rx.borrow_and_update() {
                    return;
                }
                if first_refresh_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        match outcome {
            Ok(()) if self.has_refreshed_at_least_once() => Ok(()),
            _ => Err(DataSourceError::FirstRefreshTimeout(timeout)),
        }
    }
}
