// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The backend stub: accepts serverless agent telemetry, records it, and
//! serves it back for inspection by the test suites.
//!
//! The same routes are mounted bare (the Lambda extension protocol) and under
//! the `/serverless` prefix (the acceptor protocol), so the stub can stand in
//! for either intake.

use std::io;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::http::{bad_request, empty_response, headers_to_json, json_response, Body};
use crate::ipc;
use crate::store::BackendState;

/// Serves the backend stub on the given listener until the process is killed.
///
/// Emits `ready_message` on stdout once the listener is accepting, which is
/// what the test control layer waits for.
pub async fn serve(
    listener: TcpListener,
    state: Arc<BackendState>,
    ready_message: &str,
) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    ipc::send_to_parent(ready_message);

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
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&state)));
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!("Connection error: {e}");
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<BackendState>,
) -> http::Result<Response<Body>> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = normalized_path(&uri);

    match (&method, path.as_str()) {
        (&Method::POST, "/bundle") => accept_bundle(req, &state).await,
        (&Method::POST, "/metrics") => accept_metrics(req, &state).await,
        (&Method::POST, "/traces") => accept_traces(req, &state).await,
        (&Method::POST, "/responsive") => {
            let responsive = query_param(&uri, "responsive").as_deref() == Some("true");
            state.set_responsive(responsive);
            debug!("Responsive mode set to {responsive}");
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received") => {
            let snapshot = serde_json::to_value(state.snapshot()).unwrap_or(Value::Null);
            json_response(StatusCode::OK, &snapshot)
        }
        (&Method::DELETE, "/received") => {
            state.reset();
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received/spans") => {
            json_response(StatusCode::OK, &Value::Array(state.spans()))
        }
        (&Method::DELETE, "/received/spans") => {
            state.reset_spans();
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received/metrics") => {
            json_response(StatusCode::OK, &Value::Array(state.metrics()))
        }
        (&Method::DELETE, "/received/metrics") => {
            state.reset_metrics();
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received/aggregated/metrics") => {
            json_response(StatusCode::OK, &Value::Array(state.aggregated_metrics()))
        }
        (&Method::GET, "/received/raw/bundles") => {
            json_response(StatusCode::OK, &Value::Array(state.raw_bundles()))
        }
        (&Method::DELETE, "/received/raw/bundles") => {
            state.reset_raw_bundles();
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received/raw/metrics") => {
            json_response(StatusCode::OK, &Value::Array(state.raw_metrics()))
        }
        (&Method::DELETE, "/received/raw/metrics") => {
            state.reset_raw_metrics();
            empty_response(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/received/raw/spanArrays") => {
            json_response(StatusCode::OK, &Value::Array(state.raw_span_arrays()))
        }
        (&Method::DELETE, "/received/raw/spanArrays") => {
            state.reset_raw_span_arrays();
            empty_response(StatusCode::NO_CONTENT)
        }
        _ => {
            let mut not_found = Response::default();
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn accept_bundle(
    req: Request<Incoming>,
    state: &BackendState,
) -> http::Result<Response<Body>> {
    let (headers, payload) = match read_json_body(req).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    debug!(
        "POST /bundle with {} span(s)",
        payload
            .get("spans")
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len)
    );

    state.record_raw_bundle(payload.clone());
    if !state.is_responsive() {
        return withhold_response().await;
    }
    match state.process_bundle(&headers, payload) {
        Ok(()) => empty_response(StatusCode::CREATED),
        Err(e) => bad_request(&e.to_string()),
    }
}

async fn accept_metrics(
    req: Request<Incoming>,
    state: &BackendState,
) -> http::Result<Response<Body>> {
    let (headers, payload) = match read_json_body(req).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    debug!("POST /metrics");

    state.record_raw_metrics(payload.clone());
    if !state.is_responsive() {
        return withhold_response().await;
    }
    match state.process_metrics(&headers, payload) {
        Ok(()) => empty_response(StatusCode::CREATED),
        Err(e) => bad_request(&e.to_string()),
    }
}

async fn accept_traces(
    req: Request<Incoming>,
    state: &BackendState,
) -> http::Result<Response<Body>> {
    let (headers, payload) = match read_json_body(req).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    debug!(
        "POST /traces with {} span(s)",
        payload.as_array().map_or(0, Vec::len)
    );

    state.record_raw_span_array(payload.clone());
    if !state.is_responsive() {
        return withhold_response().await;
    }
    match state.process_traces(&headers, payload) {
        Ok(()) => empty_response(StatusCode::CREATED),
        Err(e) => bad_request(&e.to_string()),
    }
}

/// Never resolves. Used for timeout-handling tests where the stub must accept
/// the connection but withhold the HTTP response.
async fn withhold_response() -> http::Result<Response<Body>> {
    debug!("Playing unresponsive, withholding the response");
    std::future::pending().await
}

async fn read_json_body(
    req: Request<Incoming>,
) -> Result<(Value, Value), http::Result<Response<Body>>> {
    let headers = headers_to_json(req.headers());
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Err(bad_request(&format!("Error reading request body: {e}"))),
    };
    match serde_json::from_slice(&bytes) {
        Ok(payload) => Ok((headers, payload)),
        Err(e) => Err(bad_request(&format!("The payload is not valid JSON: {e}"))),
    }
}

/// Strips the optional `/serverless` mount prefix.
fn normalized_path(uri: &Uri) -> String {
    let path = uri.path();
    match path.strip_prefix("/serverless") {
        Some("") => "/".to_string(),
        Some(stripped) if stripped.starts_with('/') => stripped.to_string(),
        _ => path.to_string(),
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
