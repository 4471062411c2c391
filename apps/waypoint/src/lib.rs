//! # waypoint
//!
//! The Waypoint binary's library half: the HTTP boundary, configuration
//! loading and the built-in archetypes. `main.rs` adds the CLI on top.

pub mod api;
pub mod config;
pub mod walkers;
