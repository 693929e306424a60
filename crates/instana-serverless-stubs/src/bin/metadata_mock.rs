// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use instana_serverless_stubs::metadata::{self, MetadataMock};
use instana_serverless_stubs::{init_logging, port_from_env};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let port = port_from_env("METADATA_MOCK_PORT", 1604);
    let mock = Arc::new(MetadataMock::from_env());

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind metadata mock to port {port}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = metadata::serve(listener, mock).await {
        error!("Metadata mock terminated: {e}");
        std::process::exit(1);
    }
}
