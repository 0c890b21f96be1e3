//! troza splits a Python program into chunks.
//!
//! The program's import graph is discovered statically, modules are assigned to named chunks
//! by entry-point reachability and path patterns, and each chunk is written as a single file
//! next to a manifest the runtime loader reads to pull chunks in on demand.

pub mod chunking;
pub mod config;
pub mod dirs;
pub mod emitter;
pub mod error;
pub mod fs;
pub mod graph_builder;
pub mod manifest;
pub mod module_graph;
pub mod orchestrator;
pub mod resolver;
pub mod util;
pub mod visitors;
