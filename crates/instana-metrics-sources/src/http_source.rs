// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! A data source that polls a JSON HTTP endpoint, e.g. the container
//! metadata endpoint of the platform the monitored process runs on.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::data_source::DataSource;

pub struct HttpDataSource {
    url: String,
    refresh_interval: Duration,
    client: reqwest::Client,
}

impl HttpDataSource {
    pub fn new(url: impl Into<String>, refresh_interval: Duration) -> Self {
        HttpDataSource {
            url: url.into(),
            refresh_interval,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    async fn fetch(&self) -> anyhow::Result<Value> {
        let payload = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::DataPoller;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn polls_the_endpoint_and_stores_the_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/task")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "KnownStatus": "RUNNING" }).to_string())
            .create_async()
            .await;

        let source = HttpDataSource::new(
            format!("{}/task", server.url()),
            Duration::from_millis(20),
        );
        let poller = DataPoller::new(Arc::new(source));
        poller.activate();
        poller
            .wait_for_first_refresh(Duration::from_secs(5))
            .await
            .unwrap();

        let raw = poller.raw_data().unwrap();
        assert_eq!(raw["KnownStatus"], "RUNNING");
        poller.deactivate();
    }

    #[tokio::test]
    async fn http_errors_count_as_failed_refreshes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/task")
            .with_status(500)
            .create_async()
            .await;

        let source = HttpDataSource::new(
            format!("{}/task", server.url()),
            Duration::from_millis(20),
        );
        let poller = DataPoller::new(Arc::new(source));
        poller.activate();

        assert!(poller
            .wait_for_first_refresh(Duration::from_millis(200))
            .await
            .is_err());
        poller.deactivate();
    }
}
