//! Prometheus metrics for agent runs, tool dispatch and shell sessions
//!
//! All metrics live in the default registry and are created lazily on first
//! use. `gather_text()` renders the registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Orchestration Loop
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished tasks by terminal status.
    ///
    /// Labels:
    /// - status: "done", "max_iterations", "provider_failure"
    pub static ref AGENT_TASKS: CounterVec = register_counter_vec!(
        "taskloop_agent_tasks_total",
        "Agent tasks finished, by terminal status",
        &["status"]
    ).expect("failed to register AGENT_TASKS metric");

    /// Iterations used per task.
    pub static ref AGENT_ITERATIONS: Histogram = register_histogram!(
        "taskloop_agent_iterations",
        "Loop iterations used per agent task",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    /// Provider call latency in seconds.
    ///
    /// Labels:
    /// - provider: "anthropic", "ollama", ...
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "taskloop_llm_call_seconds",
        "Latency of provider calls",
        &["provider"]
    ).expect("failed to register LLM_CALL_TIME metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Dispatch
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool invocations by tool name and outcome.
    ///
    /// Labels:
    /// - tool: registered tool name (or "unknown")
    /// - outcome: "success" or "error"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "taskloop_tool_calls_total",
        "Tool invocations dispatched, by tool and outcome",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_CALLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Code Sandbox
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sandboxed code executions by status ("success", "error", "timeout").
    pub static ref CODE_EXECUTIONS: CounterVec = register_counter_vec!(
        "taskloop_code_executions_total",
        "Sandboxed code executions, by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    /// Duration of sandboxed code executions in seconds.
    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "taskloop_code_execution_seconds",
        "Duration of sandboxed code executions"
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Shell Sessions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Shell operations by operation and result status.
    ///
    /// Labels:
    /// - op: "exec", "view", "wait", "write", "kill"
    /// - status: "success", "error", "timeout"
    pub static ref SHELL_OPERATIONS: CounterVec = register_counter_vec!(
        "taskloop_shell_operations_total",
        "Shell session operations, by operation and status",
        &["op", "status"]
    ).expect("failed to register SHELL_OPERATIONS metric");

    /// Shell sessions currently holding a live process.
    pub static ref SHELL_SESSIONS_LIVE: Gauge = register_gauge!(
        "taskloop_shell_sessions_live",
        "Shell sessions with a live child process"
    ).expect("failed to register SHELL_SESSIONS_LIVE metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        TOOL_CALLS.with_label_values(&["think", "success"]).inc();
        let text = gather_text();
        assert!(text.contains("taskloop_tool_calls_total"));
    }
}
