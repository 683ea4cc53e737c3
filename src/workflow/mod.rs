//! Workflow definition, parsing, and graph validation.
//!
//! Workflows are defined in JSON or YAML and consist of:
//! - Nodes: typed units of work with expression-capable parameters
//! - Connections: edges between named node ports
//! - Settings: per-workflow overrides of engine limits

mod graph;
mod parser;
mod types;

pub use graph::Graph;
pub use parser::{parse_workflow, parse_workflow_file, to_json};
pub use types::*;
