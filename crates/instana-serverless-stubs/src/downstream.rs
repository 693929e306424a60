// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The downstream dummy: a trivial HTTP service the monitored process calls
//! so that exit spans have a real target.

use std::io;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::http::{json_response, Body};
use crate::ipc;

pub const READY_MESSAGE: &str = "downstream dummy: started";

pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
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
        tokio::spawn(async move {
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service_fn(handle))
                .await
            {
                debug!("Connection error: {e}");
            }
        });
    }
}

async fn handle(req: Request<Incoming>) -> http::Result<Response<Body>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    // Drain the body so keep-alive connections stay usable.
    let _ = req.into_body().collect().await;

    debug!("{method} {path}");
    json_response(
        StatusCode::OK,
        &json!({ "message": "OK", "method": method.as_str(), "path": path }),
    )
}
