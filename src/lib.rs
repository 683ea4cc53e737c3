//! nodeflow - graph workflow execution engine
//!
//! A workflow is a graph of typed nodes joined by connections between named
//! ports. The engine walks it from the trigger nodes, resolves `${...}`
//! expressions in node parameters, and records every node visit.
//!
//! ## Key Features
//!
//! - **Cycles allowed**: retry loops route back to earlier nodes, bounded by a
//!   per-execution step budget
//! - **Branching and joins**: IF/Switch select output ports, untaken branches
//!   are skipped, merge nodes wait for their inbound edges
//! - **Loops**: a loop node runs its `body` subgraph once per item, optionally
//!   in parallel batches
//! - **Auditable**: one NodeExecution per visit plus structured log events
//!
//! ## Example
//!
//! ```yaml
//! id: greet
//! name: Greet
//! nodes:
//!   - id: start
//!     type: trigger
//!   - id: greeting
//!     type: set
//!     parameters:
//!       fields:
//!         message: "concat('Hello, ', ${name}, '!')"
//! connections:
//!   - source: start
//!     target: greeting
//! ```

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod expression;
pub mod metrics;
pub mod monitor;
pub mod nodes;
pub mod shutdown;
pub mod storage;
pub mod workflow;

pub use engine::{ExecutionHandle, Executor};
pub use error::{Error, Result};
