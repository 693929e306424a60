// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The forward proxy stub: relays absolute-form HTTP requests so tests can
//! verify that the agent under test honors proxy configuration.

use std::io;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::http::{log_and_create_http_response, Body};
use crate::ipc;

pub const READY_MESSAGE: &str = "proxy: started";

// Connection-scoped headers that must not be relayed.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct ProxyStub {
    client: reqwest::Client,
    requires_auth: bool,
}

impl ProxyStub {
    pub fn new(requires_auth: bool) -> Self {
        ProxyStub {
            client: reqwest::Client::new(),
            requires_auth,
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> http::Result<Response<Body>> {
        if self.requires_auth && !is_authorized(&req) {
            warn!("Rejecting proxy request without valid Proxy-Authorization");
            return Response::builder()
                .status(StatusCode::PROXY_AUTHENTICATION_REQUIRED)
                .header("Proxy-Authenticate", "Basic realm=\"proxy stub\"")
                .body(Body::default());
        }

        let method = req.method().clone();
        let target = req.uri().to_string();
        if req.uri().scheme().is_none() {
            return log_and_create_http_response(
                &format!("Not an absolute-form proxy request: {target}"),
                StatusCode::BAD_REQUEST,
            );
        }
        debug!("Forwarding {method} {target}");

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in req.headers() {
            let name = name.as_str();
            if HOP_BY_HOP_HEADERS.contains(&name) || name == "host" {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading proxy request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let forward_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return log_and_create_http_response(
                    &format!("Unsupported method: {method}"),
                    StatusCode::METHOD_NOT_ALLOWED,
                );
            }
        };

        let upstream = self
            .client
            .request(forward_method, &target)
            .headers(headers)
            .body(body)
            .send()
            .await;

        match upstream {
            Ok(upstream) => {
                let status = StatusCode::from_u16(upstream.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let body = upstream.bytes().await.unwrap_or_default();
                Response::builder().status(status).body(Body::from(body))
            }
            Err(e) => log_and_create_http_response(
                &format!("Error forwarding proxy request to {target}: {e}"),
                StatusCode::BAD_GATEWAY,
            ),
        }
    }
}

fn is_authorized(req: &Request<Incoming>) -> bool {
    req.headers()
        .get("proxy-authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Basic "))
}

pub async fn serve(listener: TcpListener, proxy: Arc<ProxyStub>) -> anyhow::Result<()> {
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
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let proxy = Arc::clone(&proxy);
                async move { proxy.handle(req).await }
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
