//! Per-run task and execution state

use serde_json::Value;

use crate::conversation::Message;
use crate::sandbox::ExecutionScope;

/// The user's request plus the conversation it produced
#[derive(Debug, Clone)]
pub struct Task {
    pub description: String,
    pub messages: Vec<Message>,
    result: Option<Value>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            messages: Vec::new(),
            result: None,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Mark the task finished with a final answer
    ///
    /// Only the first answer is kept.
    pub fn finish(&mut self, answer: Value) {
        if self.result.is_none() {
            self.result = Some(answer);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }
}

/// Mutable state built-in tools may read and write during one run
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub task: Task,
    pub plan: Option<String>,
    pub findings: Vec<String>,
    pub scope: ExecutionScope,
}

impl ExecutionState {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            plan: None,
            findings: Vec::new(),
            scope: ExecutionScope::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_answer_wins() {
        let mut task = Task::new("demo");
        assert!(!task.is_finished());
        task.finish(json!("4"));
        task.finish(json!("5"));
        assert_eq!(task.result(), Some(&json!("4")));
    }
}
