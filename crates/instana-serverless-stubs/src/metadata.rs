// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The container metadata mock: serves task metadata the way the Fargate
//! task metadata endpoint does, with counters that grow per request so that
//! rate-derived metrics in the agent under test have something to compute.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::http::{json_response, Body};
use crate::ipc;

pub const READY_MESSAGE: &str = "metadata mock: started";

const AWS_ACCOUNT: &str = "555123456789";
const CLUSTER_NAME: &str = "serverless-test-cluster";
const TASK_DEFINITION_NAME: &str = "serverless-test-task-definition";
const TASK_DEFINITION_VERSION: &str = "42";
const CONTAINER_NAME: &str = "serverless-test-container";
const DOCKER_ID: &str = "01234567890abcdef01234567890abcdef01234567890abcdef01234567890ab";
const PAUSE_DOCKER_ID: &str = "1f11d3be4668926ba50c5a6049bf75103f9c708cb70ad967d96e27fd914067ec";

/// Task metadata platform version; `1.4.0` nests per-container stats under
/// the docker id, earlier versions return the stats object directly.
pub struct MetadataMock {
    platform_version: String,
    request_count: AtomicU64,
}

impl MetadataMock {
    pub fn new(platform_version: impl Into<String>) -> Self {
        MetadataMock {
            platform_version: platform_version.into(),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn from_env() -> Self {
        let platform_version =
            std::env::var("PLATFORM_VERSION").unwrap_or_else(|_| "1.3.0".to_string());
        MetadataMock::new(platform_version)
    }

    fn container_metadata(&self) -> Value {
        json!({
            "DockerId": DOCKER_ID,
            "Name": CONTAINER_NAME,
            "DockerName": format!(
                "ecs-{TASK_DEFINITION_NAME}-{TASK_DEFINITION_VERSION}-{CONTAINER_NAME}-abcdefg0123456789012"
            ),
            "Image": format!(
                "{AWS_ACCOUNT}.dkr.ecr.us-east-2.amazonaws.com/{TASK_DEFINITION_NAME}:latest"
            ),
            "ImageID": "sha256:fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210",
            "Labels": {
                "com.amazonaws.ecs.cluster":
                    format!("arn:aws:ecs:us-east-2:{AWS_ACCOUNT}:cluster/{CLUSTER_NAME}"),
                "com.amazonaws.ecs.container-name": CONTAINER_NAME,
                "com.amazonaws.ecs.task-arn": format!(
                    "arn:aws:ecs:us-east-2:{AWS_ACCOUNT}:task/55566677-c1e5-5780-9806-aabbccddeeff"
                ),
                "com.amazonaws.ecs.task-definition-family": TASK_DEFINITION_NAME,
                "com.amazonaws.ecs.task-definition-version": TASK_DEFINITION_VERSION
            },
            "DesiredStatus": "RUNNING",
            "KnownStatus": "RUNNING",
            "Limits": { "CPU": 0, "Memory": 0 },
            "CreatedAt": "2020-03-25T14:34:29.936120727Z",
            "StartedAt": "2020-03-25T14:34:31.56264157Z",
            "Type": "NORMAL",
            "Networks": [{ "NetworkMode": "awsvpc", "IPv4Addresses": ["166.66.66.66"] }]
        })
    }

    fn task_metadata(&self) -> Value {
        json!({
            "Cluster": format!("arn:aws:ecs:us-east-2:{AWS_ACCOUNT}:cluster/{CLUSTER_NAME}"),
            "TaskARN": format!(
                "arn:aws:ecs:us-east-2:{AWS_ACCOUNT}:task/55566677-c1e5-5780-9806-aabbccddeeff"
            ),
            "Family": TASK_DEFINITION_NAME,
            "Revision": TASK_DEFINITION_VERSION,
            "DesiredStatus": "RUNNING",
            "KnownStatus": "RUNNING",
            "Containers": [
                {
                    "DockerId": PAUSE_DOCKER_ID,
                    "Name": "~internal~ecs~pause",
                    "Type": "CNI_PAUSE",
                    "DesiredStatus": "RESOURCES_PROVISIONED",
                    "KnownStatus": "RESOURCES_PROVISIONED",
                    "Limits": { "CPU": 0, "Memory": 0 }
                },
                self.container_metadata()
            ],
            "Limits": { "CPU": 0.25, "Memory": 512 },
            "PullStartedAt": "2020-03-25T14:34:25.75886719Z",
            "PullStoppedAt": "2020-03-25T14:34:29.92587709Z",
            "AvailabilityZone": "us-east-2b"
        })
    }

    fn container_stats(&self, requests: u64) -> Value {
        json!({
            "read": "2020-03-25T14:35:20.355666414Z",
            "preread": "2020-03-25T14:35:19.342026094Z",
            "pids_stats": { "current": 7 },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    { "major": 202, "minor": 26368, "op": "Read", "value": 5_890_048 + requests * 300 },
                    { "major": 202, "minor": 26368, "op": "Write", "value": 12_288 + requests * 30 }
                ]
            },
            "cpu_stats": {
                "cpu_usage": {
                    "total_usage": 298_079_958u64 + requests * 5_678,
                    "usage_in_kernelmode": 30_000_000 + requests * 1_234,
                    "usage_in_usermode": 220_000_000 + requests * 4_444
                },
                "system_cpu_usage": 192_900_000_123u64 + requests * 100_000,
                "online_cpus": 2
            },
            "memory_stats": {
                "usage": 10_035_200,
                "max_usage": 12_677_120,
                "limit": 4_134_825_984u64
            },
            "networks": {
                "eth0": {
                    "rx_bytes": 20_000_000 + requests * 128,
                    "rx_packets": 100_000 + requests * 8,
                    "rx_errors": requests,
                    "rx_dropped": requests * 3,
                    "tx_bytes": 10_000_000 + requests * 256,
                    "tx_packets": 100_000 + requests * 4,
                    "tx_errors": requests * 2,
                    "tx_dropped": requests
                }
            },
            "name": format!(
                "/ecs-{TASK_DEFINITION_NAME}-{TASK_DEFINITION_VERSION}-{CONTAINER_NAME}-ece0aff5d49f9a96b501"
            ),
            "id": DOCKER_ID
        })
    }

    fn stats(&self, requests: u64) -> Value {
        let stats = self.container_stats(requests);
        if self.platform_version == "1.4.0" {
            json!({ DOCKER_ID: stats })
        } else {
            stats
        }
    }

    fn task_stats(&self, requests: u64) -> Value {
        json!({
            PAUSE_DOCKER_ID: self.container_stats(requests),
            DOCKER_ID: self.container_stats(requests)
        })
    }

    fn handle(&self, method: &Method, path: &str) -> http::Result<Response<Body>> {
        let requests = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{method} {path} (request #{requests})");

        match (method, path) {
            (&Method::GET, "/") => json_response(StatusCode::OK, &self.container_metadata()),
            (&Method::GET, "/task") => json_response(StatusCode::OK, &self.task_metadata()),
            (&Method::GET, "/stats") => json_response(StatusCode::OK, &self.stats(requests)),
            (&Method::GET, "/task/stats") => {
                json_response(StatusCode::OK, &self.task_stats(requests))
            }
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }
}

pub async fn serve(listener: TcpListener, mock: Arc<MetadataMock>) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    ipc::send_to_parent(READY_MESSAGE);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionRefused
                ) =>
            {
                continue;
            }
            Err(e) => {
                error!("Server error: {e}");
                return Err(e.into());
            }
        };

        let io = TokioIo::new(stream);
        let mock = Arc::clone(&mock);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let mock = Arc::clone(&mock);
                async move { mock.handle(req.method(), req.uri().path()) }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!("Connection error: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_counters_grow_per_request() {
        let mock = MetadataMock::new("1.3.0");
        let first = mock.handle(&Method::GET, "/stats").unwrap();
        let second = mock.handle(&Method::GET, "/stats").unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        // Two requests have been counted; the third snapshot reflects them.
        let stats = mock.stats(3);
        assert_eq!(
            stats["cpu_stats"]["cpu_usage"]["total_usage"],
            298_079_958u64 + 3 * 5_678
        );
    }

    #[test]
    fn platform_1_4_nests_stats_under_the_docker_id() {
        let mock = MetadataMock::new("1.4.0");
        let stats = mock.stats(1);
        assert!(stats.get(DOCKER_ID).is_some());

        let mock = MetadataMock::new("1.3.0");
        let stats = mock.stats(1);
        assert!(stats.get(DOCKER_ID).is_none());
        assert!(stats.get("cpu_stats").is_some());
    }

    #[test]
    fn task_metadata_lists_both_containers() {
        let mock = MetadataMock::new("1.3.0");
        let task = mock.task_metadata();
        let containers = task["Containers"].as_array().unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1]["DockerId"], DOCKER_ID);
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let mock = MetadataMock::new("1.3.0");
        let response = mock.handle(&Method::GET, "/no/such/path").unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
