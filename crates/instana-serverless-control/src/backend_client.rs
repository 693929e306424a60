// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the query/reset surface of the backend stub.

use serde_json::Value;

/// Talks to one backend stub instance. The base URL includes the acceptor
/// mount, e.g. `http://127.0.0.1:8443/serverless`.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        BackendClient {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn received(&self) -> Result<Value, reqwest::Error> {
        self.client
            .get(format!("{}/received", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn spans(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/spans").await
    }

    pub async fn metrics(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/metrics").await
    }

    pub async fn aggregated_metrics(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/aggregated/metrics").await
    }

    pub async fn raw_bundles(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/raw/bundles").await
    }

    pub async fn raw_metrics(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/raw/metrics").await
    }

    pub async fn raw_span_arrays(&self) -> Result<Vec<Value>, reqwest::Error> {
        self.get_list("/received/raw/spanArrays").await
    }

    pub async fn reset(&self) -> Result<(), reqwest::Error> {
        self.delete("/received").await
    }

    pub async fn reset_spans(&self) -> Result<(), reqwest::Error> {
        self.delete("/received/spans").await
    }

    pub async fn reset_metrics(&self) -> Result<(), reqwest::Error> {
        self.delete("/received/metrics").await
    }

    pub async fn set_responsive(&self, responsive: bool) -> Result<(), reqwest::Error> {
        self.client
            .post(format!(
                "{}/responsive?responsive={responsive}",
                self.base_url
            ))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>, reqwest::Error> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), reqwest::Error> {
        self.client
            .delete(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fetches_spans_from_the_acceptor_mount() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/serverless/received/spans")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([{ "n": "aws.lambda.entry" }, { "n": "node.http.client" }]).to_string(),
            )
            .create_async()
            .await;

        let client = BackendClient::new(format!("{}/serverless", server.url()));
        let spans = client.spans().await.unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0]["n"], "aws.lambda.entry");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resets_report_success_on_204() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/serverless/received")
            .with_status(204)
            .create_async()
            .await;

        let client = BackendClient::new(format!("{}/serverless", server.url()));
        client.reset().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn responsiveness_is_toggled_via_query_parameter() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/serverless/responsive")
            .match_query(mockito::Matcher::UrlEncoded(
                "responsive".into(),
                "false".into(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let client = BackendClient::new(format!("{}/serverless", server.url()));
        client.set_responsive(false).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_surface_as_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/serverless/received/metrics")
            .with_status(500)
            .create_async()
            .await;

        let client = BackendClient::new(format!("{}/serverless", server.url()));
        assert!(client.metrics().await.is_err());
    }
}
