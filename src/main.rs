//! ocrbatch - batch PDF OCR with isolated worker processes.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Worker processes emit NDJSON events on stdout; no log subscriber may
    // share that stream with them.
    if !ocrbatch::cli::is_worker_invocation() {
        let default_filter = if ocrbatch::cli::is_verbose() {
            "ocrbatch=info"
        } else {
            "ocrbatch=warn"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    ocrbatch::cli::run().await
}
