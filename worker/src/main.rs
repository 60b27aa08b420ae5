//! Entry point for the worker process. Takes a single optional `host:port`
//! argument; when present, the worker dials back out to the parent's
//! loopback listener (socket-mode transport) instead of using its own stdio.

use sqlite_bridge_worker::{run, transport};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args().nth(1);
    let (read, write) = match transport::connect(addr.as_deref()).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(%err, "failed to establish transport");
            std::process::exit(1);
        }
    };

    let code = run::serve(read, write).await;
    std::process::exit(code);
}
