//! One named shell session: a child process and its captured output

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for reader tasks to flush after the process exits
const READER_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for shell session operations
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error(transparent)]
    Path(#[from] crate::workspace::PathError),
    #[error("Session {0} does not exist")]
    UnknownSession(String),
    #[error("No running process in session {0}")]
    NotRunning(String),
    #[error("Failed to start command: {0}")]
    Spawn(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command started in a session, plus everything it has printed so far
pub struct ShellSession {
    pub id: String,
    pub command: String,
    pub exec_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pid: Option<u32>,
    /// Process group still owed a cleanup; outlives the leader when it left
    /// background jobs behind
    group: Option<Pid>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output_rx: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    output: String,
    exit_code: Option<i32>,
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

impl ShellSession {
    /// Start `command` under `sh -c` in its own process group
    pub fn spawn(id: &str, exec_dir: &Path, command: &str) -> Result<Self, ShellError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(exec_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(ShellError::Spawn)?;

        let (tx, output_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, tx)));
        }

        let pid = child.id();
        debug!(session = id, pid, command, "shell process started");

        Ok(Self {
            id: id.to_string(),
            command: command.to_string(),
            exec_dir: exec_dir.to_path_buf(),
            started_at: Utc::now(),
            pid,
            group: pid.map(|pid| Pid::from_raw(pid as i32)),
            stdin: child.stdin.take(),
            child: Some(child),
            output_rx,
            readers,
            output: String::new(),
            exit_code: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the session still holds a process that has not been reaped
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Everything captured so far
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Move whatever the readers have produced into the buffer
    pub fn drain(&mut self) {
        while let Ok(chunk) = self.output_rx.try_recv() {
            self.output.push_str(&chunk);
        }
    }

    /// Non-blocking exit check; releases the process handles once it has exited
    pub async fn refresh(&mut self) -> Result<(), ShellError> {
        self.drain();
        let status = match self.child.as_mut() {
            Some(child) => child.try_wait()?,
            None => None,
        };
        if let Some(status) = status {
            self.mark_exited(status).await;
        }
        Ok(())
    }

    /// Send text to the process's stdin
    pub async fn write(&mut self, text: &str, press_enter: bool) -> Result<(), ShellError> {
        self.refresh().await?;
        let stdin = match (self.is_running(), self.stdin.as_mut()) {
            (true, Some(stdin)) => stdin,
            _ => return Err(ShellError::NotRunning(self.id.clone())),
        };
        stdin.write_all(text.as_bytes()).await?;
        if press_enter {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    /// Terminate the process group: SIGTERM, then SIGKILL after `grace`
    ///
    /// The group is signalled even when the leader has already exited, so
    /// background jobs it started are stopped too. Returns false when nothing
    /// in the session was left to stop.
    pub async fn terminate(&mut self, grace: Duration) -> Result<bool, ShellError> {
        self.refresh().await?;
        let Some(group) = self.group else {
            return Ok(false);
        };
        if self.child.is_none() && !group_alive(group) {
            self.group = None;
            return Ok(false);
        }

        let deadline = Instant::now() + grace;
        signal_group(&self.id, group, Signal::SIGTERM);

        if let Some(child) = self.child.as_mut() {
            let status = match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(session = %self.id, pid = self.pid, "process ignored SIGTERM; sending SIGKILL");
                    signal_group(&self.id, group, Signal::SIGKILL);
                    child.start_kill().ok();
                    child.wait().await?
                }
            };
            self.mark_exited(status).await;
        }

        // Members that outlived the leader
        while group_alive(group) && Instant::now() < deadline {
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
        if group_alive(group) {
            debug!(session = %self.id, "process group survived SIGTERM; sending SIGKILL");
            signal_group(&self.id, group, Signal::SIGKILL);
        }

        self.group = None;
        Ok(true)
    }

    async fn mark_exited(&mut self, status: ExitStatus) {
        let code = status
            .code()
            .unwrap_or_else(|| status.signal().map_or(-1, |signal| -signal));
        self.exit_code = Some(code);
        self.child = None;
        self.stdin = None;

        for reader in self.readers.drain(..) {
            if tokio::time::timeout(READER_FLUSH_TIMEOUT, reader).await.is_err() {
                debug!(session = %self.id, "output reader still open after exit");
            }
        }
        self.drain();
        debug!(session = %self.id, exit_code = code, "shell process exited");
    }
}

/// Whether any process (including an unreaped zombie) is still in `group`
fn group_alive(group: Pid) -> bool {
    killpg(group, None).is_ok()
}

fn signal_group(session: &str, group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(session, %group, ?signal, error = %e, "failed to signal process group"),
    }
}

/// Forward a stream to the session channel, keeping UTF-8 sequences intact
async fn pump<R>(mut stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut pending);
                if !text.is_empty() && tx.send(text).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "output reader stopped");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Split off the longest decodable prefix of `bytes`
///
/// An incomplete multi-byte sequence at the end stays in `bytes`; invalid
/// bytes anywhere are replaced.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    let (valid, truncated) = match std::str::from_utf8(bytes) {
        Ok(_) => (bytes.len(), false),
        Err(e) => (e.valid_up_to(), e.error_len().is_none()),
    };
    if truncated {
        let rest = bytes.split_off(valid);
        let head = std::mem::replace(bytes, rest);
        String::from_utf8_lossy(&head).into_owned()
    } else {
        let text = String::from_utf8_lossy(bytes).into_owned();
        bytes.clear();
        text
    }
}
