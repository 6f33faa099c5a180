//! Observable loop events
//!
//! The controller optionally sends one [`AgentEvent`] per notable step to an
//! unbounded channel. The CLI prints them as console lines or as JSON lines.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::controller::LoopStatus;

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Create an event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskStarted {
        trace_id: String,
        task: String,
    },
    IterationStarted {
        iteration: usize,
        summary: bool,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        correlation_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        correlation_id: String,
        name: String,
        content: Value,
        is_error: bool,
    },
    Warning {
        message: String,
    },
    TaskFinished {
        status: LoopStatus,
        iterations: usize,
        final_answer: Option<Value>,
    },
}
