// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use instana_serverless_stubs::store::BackendState;
use instana_serverless_stubs::{backend, flag_from_env, init_logging, port_from_env};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let port = port_from_env("BACKEND_PORT", 8443);
    let unresponsive = flag_from_env("BACKEND_UNRESPONSIVE");
    let drop_data = flag_from_env("DROP_DATA");
    let state = Arc::new(BackendState::new(!unresponsive, drop_data));

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind backend stub to port {port}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = backend::serve(listener, state, "backend: started").await {
        error!("Backend stub terminated: {e}");
        std::process::exit(1);
    }
}
