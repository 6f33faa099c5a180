//! Agent Controller - the orchestration loop
//!
//! One controller runs one task at a time. Each iteration asks the provider
//! for the next assistant turn, dispatches every tool invocation in the order
//! the model emitted them, appends a correlated result for each, and repeats
//! until a terminal [`LoopStatus`] is reached.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::events::{AgentEvent, EventSender};
use super::prompts::{
    summary_system_prompt, tool_system_prompt, DEFAULT_SYSTEM_PROMPT, FINAL_ANSWER_NUDGE,
};
use super::state::{ExecutionState, Task};
use crate::config::AgentConfig;
use crate::conversation::{tool_invocations, ContentBlock, Message, ToolInvocation};
use crate::metrics::{AGENT_ITERATIONS, AGENT_TASKS, LLM_CALL_TIME};
use crate::provider::{
    parse_tool_calls_from_text, synthesize_call_id, ChatProvider, ProviderError, ProviderRequest,
    ProviderResponse,
};
use crate::tools::{ToolRegistry, ToolSchema};

/// Loop state; everything but `Running` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Running,
    Done,
    MaxIterations,
    ProviderFailure,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Running => "running",
            LoopStatus::Done => "done",
            LoopStatus::MaxIterations => "max_iterations",
            LoopStatus::ProviderFailure => "provider_failure",
        }
    }
}

/// Result of an agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Unique trace ID for this agent run
    pub trace_id: String,
    pub status: LoopStatus,
    /// Argument of the final_answer tool, if it ran
    pub final_answer: Option<Value>,
    /// Text of the last assistant turn
    pub final_response: String,
    /// Loop iterations used
    pub iterations: usize,
    /// Provider calls made, summary turns included
    pub provider_calls: usize,
    /// Number of tool calls executed
    pub tool_calls_made: usize,
    pub plan: Option<String>,
    pub findings: Vec<String>,
    /// Full conversation, starting with the task
    pub messages: Vec<Message>,
    pub warnings: Vec<String>,
    /// Provider error for `ProviderFailure`
    pub error: Option<String>,
}

/// Error type for agent operations
///
/// Provider failures are not errors here; they end the run with
/// [`LoopStatus::ProviderFailure`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("task description is empty")]
    EmptyTask,
}

/// Drives one task through the provider and the tool registry
pub struct AgentController {
    provider: Arc<dyn ChatProvider>,
    registry: ToolRegistry,
    config: Arc<AgentConfig>,
    events: Option<EventSender>,
}

/// Mutable bookkeeping for one run
struct RunState {
    trace_id: String,
    exec: ExecutionState,
    iterations: usize,
    provider_calls: usize,
    tool_calls_made: usize,
    final_response: String,
    warnings: Vec<String>,
    error: Option<String>,
}

impl AgentController {
    pub fn new(provider: Arc<dyn ChatProvider>, registry: ToolRegistry, config: Arc<AgentConfig>) -> Self {
        Self {
            provider,
            registry,
            config,
            events: None,
        }
    }

    /// Send loop events to `sender`
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the agent loop for a given task
    pub async fn run(&self, task: &str) -> Result<AgentResult, AgentError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(AgentError::EmptyTask);
        }
        let trace_id = Uuid::now_v7().to_string();

        // Root span for the entire agent task
        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            provider = %self.provider.name(),
            model = %self.config.model,
            otel.name = "agent_task"
        );

        Ok(self.run_loop(task, trace_id).instrument(root_span).await)
    }

    async fn run_loop(&self, task: &str, trace_id: String) -> AgentResult {
        crate::trace_log!(info, trace_id, task = %task, "Starting agent task");
        self.emit(AgentEvent::TaskStarted {
            trace_id: trace_id.clone(),
            task: task.to_string(),
        });

        let mut exec = ExecutionState::new(Task::new(task));
        self.registry.prepare_state(&mut exec);
        exec.task.push(Message::user(task));

        let mut run = RunState {
            trace_id,
            exec,
            iterations: 0,
            provider_calls: 0,
            tool_calls_made: 0,
            final_response: String::new(),
            warnings: Vec::new(),
            error: None,
        };

        let schemas = self.registry.get_schemas();
        let structured = self.provider.supports_tool_blocks();
        let base = self.config.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let tool_prompt = tool_system_prompt(base, &schemas, structured);
        let summary_prompt = summary_system_prompt(base);

        let mut used_tools = false;
        let status = loop {
            if run.iterations >= self.config.max_iterations {
                crate::trace_log!(warn, run.trace_id, iterations = run.iterations, "Max iterations reached");
                break match self.summary_turn(&mut run, &summary_prompt, &schemas).await {
                    Ok(()) => LoopStatus::MaxIterations,
                    Err(()) => LoopStatus::ProviderFailure,
                };
            }

            run.iterations += 1;
            self.emit(AgentEvent::IterationStarted {
                iteration: run.iterations,
                summary: false,
            });

            let response = match self.call_provider(&mut run, &tool_prompt, &schemas).await {
                Ok(response) => response,
                Err(()) => break LoopStatus::ProviderFailure,
            };

            let mut content = response.content;
            if !structured {
                self.recover_text_calls(&mut content, &schemas);
            }
            let invocations = self.record_assistant(&mut run, content);

            if invocations.is_empty() {
                if self.config.require_final_answer && !run.exec.task.is_finished() {
                    self.warn(&mut run, "Model stopped calling tools before final_answer; asking it to continue");
                    run.exec.task.push(Message::user(FINAL_ANSWER_NUDGE));
                    continue;
                }
                if used_tools {
                    info!(trace_id = %run.trace_id, "No tool calls after tool use; requesting summary");
                    if self.summary_turn(&mut run, &summary_prompt, &schemas).await.is_err() {
                        break LoopStatus::ProviderFailure;
                    }
                }
                break LoopStatus::Done;
            }

            used_tools = true;
            for invocation in invocations {
                if run.exec.task.is_finished() {
                    self.skip_invocation(&mut run, invocation, "final_answer was already called");
                } else {
                    self.dispatch(&mut run, invocation).await;
                }
            }

            if run.exec.task.is_finished() {
                break LoopStatus::Done;
            }
        };

        self.finish(run, status)
    }

    /// One provider call with metrics and a child span
    async fn call_provider(
        &self,
        run: &mut RunState,
        system_prompt: &str,
        tools: &[ToolSchema],
    ) -> Result<ProviderResponse, ()> {
        let span = info_span!(
            "llm_call",
            trace_id = %run.trace_id,
            iteration = run.iterations,
            model = %self.config.model,
            otel.name = "llm_call"
        );

        run.provider_calls += 1;
        let start = Instant::now();
        let result = self
            .provider
            .complete(ProviderRequest {
                messages: &run.exec.task.messages,
                system_prompt,
                tools,
            })
            .instrument(span)
            .await
            .and_then(|response| {
                if response.content.is_empty() {
                    Err(ProviderError::EmptyResponse)
                } else {
                    Ok(response)
                }
            });
        let elapsed = start.elapsed().as_secs_f64();
        LLM_CALL_TIME.with_label_values(&[self.provider.name()]).observe(elapsed);

        match result {
            Ok(response) => {
                debug!(
                    trace_id = %run.trace_id,
                    duration_ms = elapsed * 1000.0,
                    stop_reason = ?response.stop_reason,
                    blocks = response.content.len(),
                    "LLM call completed"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(trace_id = %run.trace_id, error = %e, "LLM call failed");
                run.error = Some(e.to_string());
                Err(())
            }
        }
    }

    /// Ask for a tools-free summary of what has been gathered
    ///
    /// Tool schemas are still sent because the history holds tool blocks.
    /// Invocations in the summary turn are answered but not executed.
    async fn summary_turn(
        &self,
        run: &mut RunState,
        summary_prompt: &str,
        tools: &[ToolSchema],
    ) -> Result<(), ()> {
        self.emit(AgentEvent::IterationStarted {
            iteration: run.iterations,
            summary: true,
        });
        let response = self.call_provider(run, summary_prompt, tools).await?;
        let invocations = self.record_assistant(run, response.content);
        for invocation in invocations {
            self.skip_invocation(run, invocation, "no more tool calls are allowed");
        }
        Ok(())
    }

    /// Append the assistant turn and return its invocations in order
    fn record_assistant(&self, run: &mut RunState, content: Vec<ContentBlock>) -> Vec<ToolInvocation> {
        let text = content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !text.trim().is_empty() {
            run.final_response = text.clone();
            self.emit(AgentEvent::AssistantText { text });
        }

        let invocations = tool_invocations(&content);
        run.exec.task.push(Message::assistant(content));
        invocations
    }

    /// Degraded mode: turn calls written as text into request blocks
    fn recover_text_calls(&self, content: &mut Vec<ContentBlock>, schemas: &[ToolSchema]) {
        if content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolInvocationRequest { .. }))
        {
            return;
        }
        let text = content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let known: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        for (i, call) in parse_tool_calls_from_text(&text, &known).into_iter().enumerate() {
            content.push(ContentBlock::request(synthesize_call_id(i), call.name, call.arguments));
        }
    }

    async fn dispatch(&self, run: &mut RunState, invocation: ToolInvocation) {
        let ToolInvocation {
            correlation_id,
            name,
            arguments,
        } = invocation;

        self.emit(AgentEvent::ToolCall {
            correlation_id: correlation_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        });

        let span = info_span!(
            "tool_call",
            trace_id = %run.trace_id,
            tool = %name,
            otel.name = "tool_call"
        );
        let outcome = self
            .registry
            .execute(&name, arguments, &mut run.exec)
            .instrument(span)
            .await;
        run.tool_calls_made += 1;

        let is_error = outcome.is_error();
        let content = outcome.content();
        if is_error {
            info!(trace_id = %run.trace_id, tool = %name, "Tool returned an error");
        } else {
            debug!(trace_id = %run.trace_id, tool = %name, "Tool succeeded");
        }

        self.emit(AgentEvent::ToolResult {
            correlation_id: correlation_id.clone(),
            name,
            content: content.clone(),
            is_error,
        });
        run.exec
            .task
            .push(Message::tool_result(correlation_id, content, is_error));
    }

    /// Answer an invocation with an error result without running it
    fn skip_invocation(&self, run: &mut RunState, invocation: ToolInvocation, reason: &str) {
        let content = json!({ "error": format!("Tool '{}' not executed: {reason}", invocation.name) });
        self.emit(AgentEvent::ToolResult {
            correlation_id: invocation.correlation_id.clone(),
            name: invocation.name,
            content: content.clone(),
            is_error: true,
        });
        run.exec
            .task
            .push(Message::tool_result(invocation.correlation_id, content, true));
    }

    fn warn(&self, run: &mut RunState, message: &str) {
        warn!(trace_id = %run.trace_id, "{message}");
        run.warnings.push(message.to_string());
        self.emit(AgentEvent::Warning {
            message: message.to_string(),
        });
    }

    fn finish(&self, mut run: RunState, status: LoopStatus) -> AgentResult {
        if status == LoopStatus::Done && !run.exec.task.is_finished() {
            self.warn(&mut run, "Task finished without a final_answer call");
        }

        AGENT_TASKS.with_label_values(&[status.as_str()]).inc();
        AGENT_ITERATIONS.observe(run.iterations as f64);
        info!(
            trace_id = %run.trace_id,
            status = status.as_str(),
            iterations = run.iterations,
            provider_calls = run.provider_calls,
            tool_calls = run.tool_calls_made,
            "Agent task finished"
        );

        let final_answer = run.exec.task.result().cloned();
        self.emit(AgentEvent::TaskFinished {
            status,
            iterations: run.iterations,
            final_answer: final_answer.clone(),
        });

        AgentResult {
            trace_id: run.trace_id,
            status,
            final_answer,
            final_response: run.final_response,
            iterations: run.iterations,
            provider_calls: run.provider_calls,
            tool_calls_made: run.tool_calls_made,
            plan: run.exec.plan,
            findings: run.exec.findings,
            messages: run.exec.task.messages,
            warnings: run.warnings,
            error: run.error,
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            // Receiver may be gone; events are best-effort
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StopReason;
    use crate::sandbox::CodeSandbox;
    use crate::tools::register_builtin_tools;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records the system prompts it saw
    struct Scripted {
        responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        prompts: Mutex<Vec<String>>,
        structured: bool,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
                structured: true,
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn supports_tool_blocks(&self) -> bool {
            self.structured
        }

        async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
            self.prompts.lock().unwrap().push(request.system_prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ProviderResponse::text("out of script")))
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ContentBlock {
        ContentBlock::request(id, name, args)
    }

    fn tool_turn(blocks: Vec<ContentBlock>) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse::new(blocks, StopReason::ToolUse))
    }

    fn controller(provider: Arc<Scripted>, config: AgentConfig) -> AgentController {
        let sandbox = Arc::new(CodeSandbox::new(&config));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, sandbox);
        AgentController::new(provider, registry, Arc::new(config))
    }

    #[tokio::test]
    async fn test_plain_answer_finishes_with_warning() {
        let provider = Scripted::new(vec![Ok(ProviderResponse::text("4"))]);
        let result = controller(provider.clone(), AgentConfig::default())
            .run("what is 2+2")
            .await
            .unwrap();

        assert_eq!(result.status, LoopStatus::Done);
        assert_eq!(result.final_response, "4");
        assert_eq!(result.final_answer, None);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_summary_turn_after_tool_use() {
        let provider = Scripted::new(vec![
            tool_turn(vec![call("a", "execute_code", json!({"code": "print(2 + 2);"}))]),
            Ok(ProviderResponse::text("done computing")),
            Ok(ProviderResponse::text("The answer is 4.")),
        ]);
        let result = controller(provider.clone(), AgentConfig::default())
            .run("compute")
            .await
            .unwrap();

        assert_eq!(result.status, LoopStatus::Done);
        assert_eq!(result.final_response, "The answer is 4.");
        assert_eq!(provider.calls(), 3);
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[2].contains("DO NOT call any more tools."));
    }

    #[tokio::test]
    async fn test_invocations_after_final_answer_are_not_executed() {
        let provider = Scripted::new(vec![tool_turn(vec![
            call("a", "final_answer", json!({"answer": "4"})),
            call("b", "update_plan", json!({"plan": "too late"})),
        ])]);
        let result = controller(provider.clone(), AgentConfig::default())
            .run("finish")
            .await
            .unwrap();

        assert_eq!(result.status, LoopStatus::Done);
        assert_eq!(result.final_answer, Some(json!("4")));
        assert_eq!(result.plan, None);
        assert_eq!(result.tool_calls_made, 1);
        assert_eq!(provider.calls(), 1);

        let last = result.messages.last().unwrap();
        match &last.blocks()[0] {
            ContentBlock::ToolInvocationResult {
                correlation_id,
                is_error,
                content,
            } => {
                assert_eq!(correlation_id, "b");
                assert!(*is_error);
                assert!(content["error"].as_str().unwrap().contains("not executed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_terminal() {
        let provider = Scripted::new(vec![Err(ProviderError::EmptyResponse)]);
        let result = controller(provider.clone(), AgentConfig::default())
            .run("anything")
            .await
            .unwrap();
        assert_eq!(result.status, LoopStatus::ProviderFailure);
        assert!(result.error.is_some());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_require_final_answer_nudges() {
        let provider = Scripted::new(vec![
            Ok(ProviderResponse::text("thinking")),
            tool_turn(vec![call("a", "final_answer", json!({"answer": 1}))]),
        ]);
        let config = AgentConfig {
            require_final_answer: true,
            ..AgentConfig::default()
        };
        let result = controller(provider.clone(), config).run("go").await.unwrap();

        assert_eq!(result.status, LoopStatus::Done);
        assert_eq!(result.final_answer, Some(json!(1)));
        assert_eq!(result.warnings.len(), 1);
        assert!(result
            .messages
            .iter()
            .any(|m| m.text() == FINAL_ANSWER_NUDGE));
    }

    #[tokio::test]
    async fn test_degraded_mode_parses_text_calls() {
        let provider = Arc::new(Scripted {
            responses: Mutex::new(
                vec![Ok(ProviderResponse::text(
                    "Function to call: final_answer\nArguments: {\"answer\": \"ok\"}",
                ))]
                .into(),
            ),
            prompts: Mutex::new(Vec::new()),
            structured: false,
        });
        let result = controller(provider.clone(), AgentConfig::default())
            .run("go")
            .await
            .unwrap();

        assert_eq!(result.final_answer, Some(json!("ok")));
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("Tool name: final_answer"));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (tx, mut rx) = crate::agent::events::channel();
        let provider = Scripted::new(vec![tool_turn(vec![call(
            "a",
            "final_answer",
            json!({"answer": "x"}),
        )])]);
        let controller = controller(provider, AgentConfig::default()).with_events(tx);
        controller.run("go").await.unwrap();
        drop(controller);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(AgentEvent::TaskStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(AgentEvent::TaskFinished {
                status: LoopStatus::Done,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_task_is_rejected() {
        let provider = Scripted::new(vec![]);
        let err = controller(provider, AgentConfig::default())
            .run("  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EmptyTask));
    }
}
