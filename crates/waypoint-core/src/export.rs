//! # DOT Export
//!
//! Renders the graph reachable from a node in Graphviz DOT.
//!
//! The walk is breadth-first over edges in both directions, bounded by
//! depth, and only includes anchors the session can read. Labels are the
//! archetype name followed by its fields as JSON.

use crate::access::AccessControl;
use crate::anchor::Anchor;
use crate::primitives;
use crate::query::{EdgeQuery, EdgeResolver};
use crate::session::Session;
use crate::types::{AccessLevel, AnchorId, WaypointError};
use std::collections::{BTreeSet, VecDeque};

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn label(anchor: &Anchor) -> Result<String, WaypointError> {
    let report = anchor.report()?;
    let type_name = anchor.type_name()?;
    if report.context.is_empty() {
        return Ok(type_name.to_string());
    }
    Ok(format!(
        "{} {}",
        type_name,
        serde_json::Value::Object(report.context)
    ))
}

/// DOT rendering of the graph around `start`, at most `depth` hops deep
/// (`DEFAULT_DOT_DEPTH` when `None`).
pub fn export_dot(
    session: &Session,
    start: &Anchor,
    depth: Option<usize>,
) -> Result<String, WaypointError> {
    let start = session.hydrate(start)?;
    AccessControl::require(session, &start, AccessLevel::Read)?;
    let max_depth = depth.unwrap_or(primitives::DEFAULT_DOT_DEPTH);
    let query = EdgeQuery::any();

    let mut out = String::from("digraph {\n");
    let mut nodes = BTreeSet::from([start.id()]);
    let mut edges: BTreeSet<AnchorId> = BTreeSet::new();
    out.push_str(&format!(
        "  \"{}\" [label=\"{}\"];\n",
        start.id(),
        escape(&label(&start)?)
    ));

    let mut queue = VecDeque::from([(start, 0usize)]);
    while let Some((node, level)) = queue.pop_front() {
        if level >= max_depth {
            continue;
        }
        for hop in EdgeResolver::hops(session, session, &node, &query, AccessLevel::Read)? {
            if nodes.insert(hop.node.id()) {
                out.push_str(&format!(
                    "  \"{}\" [label=\"{}\"];\n",
                    hop.node.id(),
                    escape(&label(&hop.node)?)
                ));
                queue.push_back((hop.node.clone(), level + 1));
            }
            if !edges.insert(hop.edge.id()) {
                continue;
            }
            let Some(ends) = hop.edge.endpoints()? else { continue };
            let style = if ends.is_undirected { ", dir=none" } else { "" };
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"{}];\n",
                ends.source,
                ends.target,
                escape(&label(&hop.edge)?),
                style
            ));
        }
    }
    out.push_str("}\n");
    tracing::debug!(nodes = nodes.len(), edges = edges.len(), "dot export");
    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================
