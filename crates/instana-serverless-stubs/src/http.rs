// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared HTTP plumbing for the stub servers.

use bytes::Bytes;
use hyper::http::{self, HeaderMap};
use hyper::{Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

/// Response body type used by all stubs.
pub type Body = http_body_util::Full<Bytes>;

/// Logs the message (info for success status codes, error otherwise) and
/// returns it as a JSON body `{"message": ...}` with the given status.
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<Response<Body>> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder().status(status).body(Body::from(body))
}

/// An error response in the shape the backend stub uses for invalid intake
/// payloads: `{"error": ...}` with status 400.
pub fn bad_request(error: &str) -> http::Result<Response<Body>> {
    error!("{error}");
    let body = json!({ "error": error }).to_string();
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(body))
}

/// A JSON response with the given status.
pub fn json_response(status: StatusCode, value: &Value) -> http::Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
}

/// An empty response with the given status.
pub fn empty_response(status: StatusCode) -> http::Result<Response<Body>> {
    Response::builder().status(status).body(Body::default())
}

/// Converts a request header map into a JSON object so stored payloads can be
/// annotated with the headers they arrived with.
pub fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut fields = Map::new();
    for (name, value) in headers {
        fields.insert(
            name.as_str().to_string(),
            Value::String(value.to_str().unwrap_or("").to_string()),
        );
    }
    Value::Object(fields)
}
