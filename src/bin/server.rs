//! Standalone book tracking server binary
//!
//! Run this to start the service as a standalone process.

use booktrack_service::config::Config;
use booktrack_service::BookServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();
    let server = BookServer::new(config)?;

    println!("Socket: {:?}", server.socket_path());
    println!("Press Ctrl+C to stop");

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    // Clean up socket file
    if server.socket_path().exists() {
        std::fs::remove_file(server.socket_path())?;
    }

    Ok(())
}
