//! `taskdeck-stub`: serves the task API locally.
//!
//! ```bash
//! # 30 generated todos on 127.0.0.1:8080, writes forgotten
//! cargo run --bin taskdeck-stub
//!
//! # Keep writes and serve a hand-written table
//! cargo run --bin taskdeck-stub -- --persist --fixture todos.toml
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskdeck_stub::config::StubOptions;
use taskdeck_stub::server::start_server_with_state;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = StubOptions::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = Arc::new(opts.build_store()?);
    let (addr, handle) = start_server_with_state(&opts.addr.to_string(), store).await?;
    tracing::info!(%addr, persist = opts.persist, fixture = ?opts.fixture, "serving");

    handle.await?;
    tracing::info!("stub stopped");
    Ok(())
}
