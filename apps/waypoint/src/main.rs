//! # Waypoint - Object-Spatial Runtime Server
//!
//! The main binary for the Waypoint graph runtime.
//!
//! This application provides:
//! - HTTP API server (axum-based) that runs walkers on behalf of roots
//! - CLI interface for store and walker operations
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │              apps/waypoint (THE BINARY)           │
//! │                                                   │
//! │   ┌─────────────┐            ┌─────────────┐      │
//! │   │    CLI      │            │  HTTP API   │      │
//! │   │   (clap)    │            │   (axum)    │      │
//! │   └──────┬──────┘            └──────┬──────┘      │
//! │          └──────────────┬───────────┘             │
//! │                         ▼                         │
//! │                 ┌───────────────┐                 │
//! │                 │ waypoint-core │                 │
//! │                 │ (THE RUNTIME) │                 │
//! │                 └───────────────┘                 │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! waypoint server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! waypoint create-root
//! waypoint run create_item --root <id> --args '{"name": "pen"}'
//! waypoint dot --root <id> --depth 2
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // WAYPOINT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WAYPOINT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "waypoint=info,waypoint_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Waypoint startup banner.
fn print_banner() {
    println!(
        r#"
  __      __                       _       _
  \ \    / /_ _ _  _ _ __  ___ (_)_ _ | |_
   \ \/\/ / _` | || | '_ \/ _ \| | ' \|  _|
    \_/\_/\__,_|\_, | .__/\___/|_|_||_|\__|
                |__/|_|

  Object-Spatial Runtime v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
