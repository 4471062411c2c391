//! # Waypoint CLI Module
//!
//! This module implements the CLI interface for Waypoint.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store status
//! - `init` - Initialize a new database
//! - `create-root` - Create a user root
//! - `run` - Run a built-in walker
//! - `dot` - Export the graph around a node in Graphviz DOT
//! - `reset` - Remove everything a root owns

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use waypoint::config::{StorageBackend, WaypointConfig};
use waypoint_core::WaypointError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Waypoint - object-spatial graph runtime
///
/// Walkers travel a graph of nodes and edges; behaviour fires where they meet.
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./waypoint.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the graph database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (durable) or "memory" (overrides the config file)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<StorageBackend>,

    /// Worker threads for parallel walkers (overrides the config file)
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store status
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Create a user root and print its id
    CreateRoot,

    /// Run a built-in walker and print its reports
    Run {
        /// Walker name (create_item, list_items, update_item, ...)
        walker: String,

        /// Root to act as (default: the system root)
        #[arg(short, long)]
        root: Option<String>,

        /// Start node id, or "root"
        #[arg(short, long, default_value = "root")]
        node: String,

        /// Walker arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Export the graph around a node in Graphviz DOT
    Dot {
        /// Root to act as (default: the system root)
        #[arg(short, long)]
        root: Option<String>,

        /// Start node id, or "root"
        #[arg(short, long, default_value = "root")]
        node: String,

        /// Maximum depth of the walk
        #[arg(short, long)]
        depth: Option<usize>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove every anchor a root owns, keeping the root
    Reset {
        /// Root to reset
        #[arg(short, long)]
        root: String,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve the configuration file and apply CLI overrides.
pub fn resolve_config(cli: &Cli) -> Result<WaypointConfig, WaypointError> {
    let mut config = WaypointConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.database {
        config.storage.path = path.clone();
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(workers) = cli.workers {
        config.runtime.workers = workers;
    }
    Ok(config)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), WaypointError> {
    let mut config = resolve_config(&cli)?;
    let json_mode = cli.json_mode;
    if cli.verbose {
        tracing::info!(?config, "resolved configuration");
    }

    match cli.command {
        Some(Commands::Server { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_server(&config).await
        }
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::CreateRoot) => cmd_create_root(&config, json_mode),
        Some(Commands::Run {
            walker,
            root,
            node,
            args,
        }) => cmd_run(&config, &walker, root.as_deref(), &node, &args),
        Some(Commands::Dot {
            root,
            node,
            depth,
            output,
        }) => cmd_dot(&config, root.as_deref(), &node, depth, output.as_deref()),
        Some(Commands::Reset { root }) => cmd_reset(&config, &root, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&config, json_mode)
        }
    }
}
