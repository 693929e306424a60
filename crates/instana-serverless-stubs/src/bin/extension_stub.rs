// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! The Lambda extension stub is the backend intake surface bound to the
//! extension port; agents configured to talk to the extension instead of the
//! acceptor use the bare (unprefixed) intake routes.

use std::sync::Arc;

use instana_serverless_stubs::store::BackendState;
use instana_serverless_stubs::{backend, flag_from_env, init_logging, port_from_env};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let port = port_from_env("EXTENSION_PORT", 7365);
    let unresponsive = flag_from_env("EXTENSION_UNRESPONSIVE");
    let state = Arc::new(BackendState::new(!unresponsive, false));

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind extension stub to port {port}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = backend::serve(listener, state, "extension: started").await {
        error!("Extension stub terminated: {e}");
        std::process::exit(1);
    }
}
