//! Agent module: the orchestration loop and its supporting pieces
//!
//! # Architecture
//!
//! ```text
//! User Task → AgentController → ChatProvider (history + system prompt + tools)
//!                  ↓
//!           assistant blocks: text | tool-invocation-request
//!                  ↓
//!           ToolRegistry::execute (one invocation at a time, in order)
//!                  ↓
//!           tool-invocation-result appended to the Task
//!                  ↓
//!           final_answer → Done | no calls → summary → Done
//!           | ceiling → summary → MaxIterations | provider error → ProviderFailure
//! ```

pub mod controller;
pub mod events;
pub mod prompts;
pub mod sessions;
pub mod state;

pub use controller::{AgentController, AgentError, AgentResult, LoopStatus};
pub use events::{AgentEvent, EventReceiver, EventSender};
pub use sessions::{RunRecord, RunStore, RunSummary};
pub use state::{ExecutionState, Task};
