//! Named shell sessions shared by the shell tools
//!
//! The session table lock is held only to look up or insert a slot. Each slot
//! has its own lock, so long operations (a `wait`, a kill grace period) on one
//! session never block calls on another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{ShellError, ShellSession};
use crate::metrics::{SHELL_OPERATIONS, SHELL_SESSIONS_LIVE};
use crate::workspace::WorkspaceRoot;

/// Default for `wait` when the caller gives no duration
pub const DEFAULT_WAIT_SECS: u64 = 60;

/// Longest a single `wait` blocks; larger requests are clamped
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Slot = Arc<Mutex<Option<ShellSession>>>;

/// Outcome category of a shell operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellStatus {
    Success,
    Error,
    Timeout,
}

/// Structured result of every shell operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellResponse {
    pub status: ShellStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_dir: Option<String>,
}

impl ShellResponse {
    fn new(status: ShellStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            pid: None,
            output: None,
            running: None,
            exit_code: None,
            command: None,
            exec_dir: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ShellStatus::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ShellStatus::Error, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ShellStatus::Timeout, message)
    }

    pub fn is_error(&self) -> bool {
        self.status == ShellStatus::Error
    }

    fn with_output(mut self, text: &str) -> Self {
        self.output = Some(text.lines().map(str::to_string).collect());
        self
    }

    fn with_session(mut self, session: &ShellSession) -> Self {
        self.pid = session.pid();
        self.running = Some(session.is_running());
        self.exit_code = session.exit_code();
        self.command = Some(session.command.clone());
        self.exec_dir = Some(session.exec_dir.display().to_string());
        self
    }
}

impl From<ShellError> for ShellResponse {
    fn from(e: ShellError) -> Self {
        ShellResponse::error(e.to_string())
    }
}

/// Summary row for `list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub command: String,
    pub running: bool,
    pub exit_code: Option<i32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Owns every shell session of the process
#[derive(Debug)]
pub struct ShellSessionManager {
    root: WorkspaceRoot,
    sessions: Mutex<HashMap<String, Slot>>,
    kill_grace: Duration,
}

impl ShellSessionManager {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self {
            root,
            sessions: Mutex::new(HashMap::new()),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    async fn slot(&self, id: &str) -> Option<Slot> {
        self.sessions.lock().await.get(id).cloned()
    }

    async fn slot_or_insert(&self, id: &str) -> Slot {
        self.sessions
            .lock()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Start `command` in session `id`, replacing any process already there
    pub async fn exec(&self, id: &str, exec_dir: &str, command: &str) -> ShellResponse {
        let response = self.exec_inner(id, exec_dir, command).await;
        record("exec", &response);
        response
    }

    async fn exec_inner(&self, id: &str, exec_dir: &str, command: &str) -> ShellResponse {
        let dir = match self.root.resolve_dir(exec_dir) {
            Ok(dir) => dir,
            Err(e) => return ShellResponse::error(e.to_string()),
        };

        let slot = self.slot_or_insert(id).await;
        let mut guard = slot.lock().await;

        if let Some(previous) = guard.as_mut() {
            let was_running = previous.is_running();
            match previous.terminate(self.kill_grace).await {
                Ok(true) => info!(session = id, "replaced running process"),
                Ok(false) => {}
                Err(e) => warn!(session = id, error = %e, "failed to stop previous process"),
            }
            note_exit(was_running, previous);
        }

        match ShellSession::spawn(id, &dir, command) {
            Ok(session) => {
                SHELL_SESSIONS_LIVE.inc();
                let response = ShellResponse::success(format!("Command started in session {id}"))
                    .with_session(&session);
                *guard = Some(session);
                response
            }
            Err(e) => ShellResponse::from(e),
        }
    }

    /// Current output and state of session `id`
    pub async fn view(&self, id: &str) -> ShellResponse {
        let response = match self.slot(id).await {
            Some(slot) => {
                let mut guard = slot.lock().await;
                match guard.as_mut() {
                    Some(session) => {
                        let was_running = session.is_running();
                        match session.refresh().await {
                            Ok(()) => {
                                note_exit(was_running, session);
                                ShellResponse::success(format!("Session {id}"))
                                    .with_output(session.output())
                                    .with_session(session)
                            }
                            Err(e) => ShellResponse::from(e),
                        }
                    }
                    None => ShellError::UnknownSession(id.to_string()).into(),
                }
            }
            None => ShellError::UnknownSession(id.to_string()).into(),
        };
        record("view", &response);
        response
    }

    /// Block until the process in session `id` exits or `seconds` elapse
    ///
    /// Output produced during the wait is returned either way. `seconds` is
    /// clamped to [`MAX_WAIT_SECS`].
    pub async fn wait(&self, id: &str, seconds: Option<u64>) -> ShellResponse {
        let response = self.wait_inner(id, seconds.unwrap_or(DEFAULT_WAIT_SECS)).await;
        record("wait", &response);
        response
    }

    async fn wait_inner(&self, id: &str, seconds: u64) -> ShellResponse {
        let Some(slot) = self.slot(id).await else {
            return ShellError::UnknownSession(id.to_string()).into();
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return ShellError::UnknownSession(id.to_string()).into();
        };

        // Output not yet pulled from the readers counts as gathered by this wait
        let start = session.output().len();
        let was_running = session.is_running();
        let deadline = Instant::now() + Duration::from_secs(seconds.min(MAX_WAIT_SECS));

        loop {
            if let Err(e) = session.refresh().await {
                return e.into();
            }
            if !session.is_running() {
                note_exit(was_running, session);
                let code = session.exit_code().unwrap_or(-1);
                return ShellResponse::success(format!("Process exited with code {code}"))
                    .with_output(&session.output()[start..])
                    .with_session(session);
            }
            let now = Instant::now();
            if now >= deadline {
                return ShellResponse::timeout(format!(
                    "Process still running after {seconds} seconds"
                ))
                .with_output(&session.output()[start..])
                .with_session(session);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Send `text` to the stdin of the process in session `id`
    pub async fn write(&self, id: &str, text: &str, press_enter: bool) -> ShellResponse {
        let response = match self.slot(id).await {
            Some(slot) => {
                let mut guard = slot.lock().await;
                match guard.as_mut() {
                    Some(session) => {
                        let was_running = session.is_running();
                        let result = session.write(text, press_enter).await;
                        note_exit(was_running, session);
                        match result {
                            Ok(()) => ShellResponse::success(format!("Input sent to session {id}"))
                                .with_session(session),
                            Err(e) => e.into(),
                        }
                    }
                    None => ShellError::UnknownSession(id.to_string()).into(),
                }
            }
            None => ShellError::UnknownSession(id.to_string()).into(),
        };
        record("write", &response);
        response
    }

    /// Stop the process in session `id`
    ///
    /// Killing a session with no live process is not an error.
    pub async fn kill(&self, id: &str) -> ShellResponse {
        let response = self.kill_inner(id).await;
        record("kill", &response);
        response
    }

    async fn kill_inner(&self, id: &str) -> ShellResponse {
        let Some(slot) = self.slot(id).await else {
            return ShellResponse::success(format!("No live process in session {id}"));
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return ShellResponse::success(format!("No live process in session {id}"));
        };

        let was_running = session.is_running();
        let result = session.terminate(self.kill_grace).await;
        note_exit(was_running, session);
        match result {
            Ok(true) => ShellResponse::success(format!("Process in session {id} terminated"))
                .with_session(session),
            Ok(false) => ShellResponse::success(format!("No live process in session {id}"))
                .with_session(session),
            Err(e) => e.into(),
        }
    }

    /// Every known session, sorted by id
    pub async fn list(&self) -> Vec<SessionSummary> {
        let slots: Vec<Slot> = self.sessions.lock().await.values().cloned().collect();
        let mut rows = Vec::with_capacity(slots.len());
        for slot in slots {
            let mut guard = slot.lock().await;
            if let Some(session) = guard.as_mut() {
                let was_running = session.is_running();
                if session.refresh().await.is_ok() {
                    note_exit(was_running, session);
                }
                rows.push(SessionSummary {
                    id: session.id.clone(),
                    command: session.command.clone(),
                    running: session.is_running(),
                    exit_code: session.exit_code(),
                    started_at: session.started_at,
                });
            }
        }
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Kill every live process
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            let response = self.kill(&id).await;
            if response.is_error() {
                warn!(session = %id, message = ?response.message, "failed to stop session on shutdown");
            }
        }
        debug!("shell sessions shut down");
    }
}

/// Keep the live-session gauge in step when a refresh observed an exit
fn note_exit(was_running: bool, session: &ShellSession) {
    if was_running && !session.is_running() {
        SHELL_SESSIONS_LIVE.dec();
    }
}

fn record(op: &str, response: &ShellResponse) {
    let status = match response.status {
        ShellStatus::Success => "success",
        ShellStatus::Error => "error",
        ShellStatus::Timeout => "timeout",
    };
    SHELL_OPERATIONS.with_label_values(&[op, status]).inc();
    debug!(op, status, message = ?response.message, "shell operation");
}
