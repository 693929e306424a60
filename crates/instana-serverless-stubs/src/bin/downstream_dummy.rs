// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use instana_serverless_stubs::{downstream, init_logging, port_from_env};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let port = port_from_env("DOWNSTREAM_DUMMY_PORT", 3456);
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind downstream dummy to port {port}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = downstream::serve(listener).await {
        error!("Downstream dummy terminated: {e}");
        std::process::exit(1);
    }
}
