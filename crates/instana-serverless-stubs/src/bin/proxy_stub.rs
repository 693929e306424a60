// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use instana_serverless_stubs::proxy::{self, ProxyStub};
use instana_serverless_stubs::{flag_from_env, init_logging, port_from_env};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    let port = port_from_env("PROXY_PORT", 3128);
    let requires_auth = flag_from_env("PROXY_REQUIRES_AUTH");
    let stub = Arc::new(ProxyStub::new(requires_auth));

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind proxy stub to port {port}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = proxy::serve(listener, stub).await {
        error!("Proxy stub terminated: {e}");
        std::process::exit(1);
    }
}
