//! Render worker binary.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelgen_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::from_default_env().add_directive("reelgen=info".parse().unwrap()),
        )
        .init();

    info!("Starting reelgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // Missing credentials or media binaries are fatal before the loop.
    let worker = match Worker::new(config) {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to start worker: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = worker.run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
