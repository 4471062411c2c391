//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waypoint::api;
use waypoint::config::{StorageBackend, WaypointConfig};
use waypoint::walkers::{WalkerCatalog, run_walker};
use waypoint_core::{
    AnchorId, Machine, ObjectSpatial, Session, WaypointError, export_dot,
};

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Validate an output path: the parent directory must exist.
///
/// Returns the path with its parent canonicalized, so ".." and symlinks in
/// the directory part are resolved before writing.
fn validate_output_path(path: &Path) -> Result<PathBuf, WaypointError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        WaypointError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(WaypointError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| WaypointError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &WaypointConfig) -> Result<(), WaypointError> {
    let machine = config.open_machine()?;

    println!("Waypoint Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.server.host);
    println!("  Port:     {}", config.server.port);
    println!("  Backend:  {}", config.storage.backend);
    if config.storage.backend == StorageBackend::Redb {
        println!("  Database: {:?}", config.storage.path);
    }
    println!("  Workers:  {}", machine.pool().workers());
    println!();
    println!("Endpoints:");
    println!("  GET  /health                - Health check");
    println!("  GET  /status                - Runtime status");
    println!("  POST /user/create           - Create a root and token");
    println!("  POST /walker/{{name}}         - Run a walker from your root");
    println!("  POST /walker/{{name}}/{{node}}  - Run a walker from a node");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    api::run_server(&addr, machine).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show store status.
pub fn cmd_status(config: &WaypointConfig, json_mode: bool) -> Result<(), WaypointError> {
    let machine = config.open_machine()?;
    let anchors = machine.store().len()?;
    let roots = machine.roots()?;
    let archetypes = machine.registry().len();

    if json_mode {
        let output = serde_json::json!({
            "backend": config.storage.backend.to_string(),
            "database": config.storage.path.to_string_lossy(),
            "anchor_count": anchors,
            "root_count": roots.len(),
            "archetypes": archetypes,
            "workers": machine.pool().workers(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Waypoint Status");
    println!("===============");
    println!("Backend:    {}", config.storage.backend);
    println!("Database:   {:?}", config.storage.path);
    println!();
    println!("Anchors:    {}", anchors);
    println!("Roots:      {}", roots.len());
    println!("Archetypes: {}", archetypes);
    println!("Workers:    {}", machine.pool().workers());

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &WaypointConfig, force: bool) -> Result<(), WaypointError> {
    if config.storage.backend == StorageBackend::Memory {
        println!("Memory backend needs no initialization");
        return Ok(());
    }

    let path = &config.storage.path;
    if path.exists() {
        if !force {
            return Err(WaypointError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| WaypointError::IoError(format!("Remove database: {}", e)))?;
    }

    let machine = config.open_machine()?;
    machine.close()?;
    println!("Initialized new redb database at {:?}", path);

    Ok(())
}

// =============================================================================
// ROOT COMMANDS
// =============================================================================

/// Create a user root.
pub fn cmd_create_root(config: &WaypointConfig, json_mode: bool) -> Result<(), WaypointError> {
    let machine = config.open_machine()?;
    let root = machine.create_root()?;
    machine.close()?;

    if json_mode {
        println!("{}", serde_json::json!({ "root_id": root.id().to_string() }));
    } else {
        println!("Created root {}", root.id());
    }
    Ok(())
}

/// Remove every anchor owned by `root`.
pub fn cmd_reset(config: &WaypointConfig, root: &str, json_mode: bool) -> Result<(), WaypointError> {
    let machine = config.open_machine()?;
    let root: AnchorId = root.parse()?;
    let session = machine.session(None)?;
    let removed = session.reset_graph(Some(root))?;
    machine.close()?;

    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "root_id": root.to_string(), "removed": removed })
        );
    } else {
        println!("Removed {} anchors owned by {}", removed, root);
    }
    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run a built-in walker and print its reports.
pub fn cmd_run(
    config: &WaypointConfig,
    walker: &str,
    root: Option<&str>,
    node: &str,
    args: &str,
) -> Result<(), WaypointError> {
    let args: Value = serde_json::from_str(args)
        .map_err(|e| WaypointError::DeserializationError(format!("Invalid arguments: {}", e)))?;

    let machine = config.open_machine()?;
    let session = open_session(&machine, root)?;
    let reports = run_walker(&session, &WalkerCatalog::builtin(), walker, node, args)?;
    machine.close()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&reports).unwrap_or_default()
    );
    Ok(())
}

// =============================================================================
// DOT COMMAND
// =============================================================================

/// Export the graph around a node in Graphviz DOT.
pub fn cmd_dot(
    config: &WaypointConfig,
    root: Option<&str>,
    node: &str,
    depth: Option<usize>,
    output: Option<&Path>,
) -> Result<(), WaypointError> {
    let machine = config.open_machine()?;
    let session = open_session(&machine, root)?;
    let start = session.get_object(node)?;
    let dot = export_dot(&session, &start, depth)?;

    match output {
        Some(output) => {
            let validated_output = validate_output_path(output)?;
            std::fs::write(&validated_output, &dot)
                .map_err(|e| WaypointError::IoError(format!("Write file: {}", e)))?;
            println!("Exported {} bytes to {:?}", dot.len(), validated_output);
        }
        None => print!("{}", dot),
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Session acting as `root`, or as the system root when none is given.
fn open_session(machine: &Arc<Machine>, root: Option<&str>) -> Result<Session, WaypointError> {
    let root = root.map(str::parse::<AnchorId>).transpose()?;
    machine.session(root)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn redb_config(dir: &Path) -> WaypointConfig {
        let mut config = WaypointConfig::default();
        config.storage.path = dir.join("waypoint.redb");
        config.runtime.workers = 1;
        config
    }

    #[test]
    fn init_refuses_existing_database_without_force() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = redb_config(temp.path());
        cmd_init(&config, false).expect("init");
        assert!(config.storage.path.exists());
        assert!(cmd_init(&config, false).is_err());
        cmd_init(&config, true).expect("force init");
    }

    #[test]
    fn walker_changes_survive_between_commands() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = redb_config(temp.path());

        let root = {
            let machine = config.open_machine().expect("machine");
            let root = machine.create_root().expect("root").id();
            machine.close().expect("close");
            root
        };
        let root_text = root.to_string();
        cmd_run(
            &config,
            "create_item",
            Some(&root_text),
            "root",
            r#"{"name": "kept", "value": 7}"#,
        )
        .expect("run");

        let machine = config.open_machine().expect("machine");
        let session = machine.session(Some(root)).expect("session");
        let reports = run_walker(
            &session,
            &WalkerCatalog::builtin(),
            "list_items",
            "root",
            Value::Null,
        )
        .expect("list");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["context"]["name"], serde_json::json!("kept"));
    }

    #[test]
    fn reset_removes_owned_anchors() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = redb_config(temp.path());
        let machine = config.open_machine().expect("machine");
        let root = machine.create_root().expect("root").id();
        let session = machine.session(Some(root)).expect("session");
        run_walker(
            &session,
            &WalkerCatalog::builtin(),
            "create_item",
            "root",
            serde_json::json!({"name": "gone"}),
        )
        .expect("create");
        machine.close().expect("close");
        drop(session);
        drop(machine);

        cmd_reset(&config, &root.to_string(), true).expect("reset");
        let machine = config.open_machine().expect("machine");
        assert_eq!(machine.roots().expect("roots").len(), 2);
        assert_eq!(machine.store().len().expect("len"), 2);
    }

    #[test]
    fn bad_arguments_are_rejected_before_opening_the_store() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = redb_config(temp.path());
        assert!(matches!(
            cmd_run(&config, "list_items", None, "root", "{not json"),
            Err(WaypointError::DeserializationError(_))
        ));
        assert!(!config.storage.path.exists());
    }

    #[test]
    fn dot_writes_to_validated_path() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = redb_config(temp.path());
        let output = temp.path().join("graph.dot");
        cmd_dot(&config, None, "root", Some(1), Some(&output)).expect("dot");
        let text = std::fs::read_to_string(&output).expect("read");
        assert!(text.starts_with("digraph {"));
        assert!(validate_output_path(&temp.path().join("missing").join("x.dot")).is_err());
    }
}
