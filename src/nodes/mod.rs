//! Node implementations.
//!
//! Nodes are the building blocks of workflows. Each node type performs one
//! step and tells the engine which output ports to route its result on.

mod debug;
mod error_node;
mod expression;
mod filter;
mod http;
mod if_node;
mod loop_node;
mod merge;
mod registry;
mod set;
mod sort;
mod switch;
mod trigger;
mod types;
mod wait;

pub use debug::DebugNode;
pub use error_node::ErrorNode;
pub use expression::ExpressionNode;
pub use filter::FilterNode;
pub use http::HttpNode;
pub use if_node::{IfNode, FALSE_PORT, TRUE_PORT};
pub use loop_node::{loop_items, parallelism, LoopNode, BODY_PORT, DONE_PORT};
pub use merge::{JoinPolicy, MergeNode, WaitMode};
pub use registry::NodeRegistry;
pub use set::SetNode;
pub use sort::SortNode;
pub use switch::{SwitchNode, DEFAULT_PORT};
pub use trigger::TriggerNode;
pub use types::{Inbound, Node, NodeContext, NodeKind, NodeResult, WaitObserver};
pub use wait::WaitNode;
