pub mod chart;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod mock;
pub mod registry;
pub mod runner;
pub mod timeslot;
pub mod tool;
pub mod tools;

pub use dispatcher::{Dispatched, Dispatcher};
pub use error::EngineError;
pub use registry::ToolRegistry;
pub use runner::{RunnerConfig, TurnOutcome, TurnRunner};
pub use tool::{ToolContext, ToolError, ToolHandler};
