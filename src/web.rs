#![cfg(not(tarpaulin_include))]

use invoice_workbench::app;

/// Main entry point for the web application.
///
/// Binds to `WORKBENCH_ADDR` (default `127.0.0.1:3000`) and serves the
/// workbench until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr =
        std::env::var("WORKBENCH_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

    app::run(&addr).await
}
