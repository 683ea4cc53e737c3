//! Execution engine for workflows.

mod cancel;
mod context;
mod executor;
mod recorder;
mod scheduler;

pub use cancel::CancellationRegistry;
pub use context::{ExecutionContext, VariableValue, VisitScope};
pub use executor::{ExecutionHandle, Executor};
pub use recorder::ExecutionRecorder;
