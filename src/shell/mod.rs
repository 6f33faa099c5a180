//! Concurrent named shell sessions
//!
//! A session is identified by a caller-chosen id and holds at most one child
//! process. Output from stdout and stderr is collected by background reader
//! tasks into a per-session buffer. Every operation returns a structured
//! [`ShellResponse`] with a `success`, `error` or `timeout` status; nothing
//! here panics or propagates an error to the caller.

pub mod manager;
pub mod session;

pub use manager::{
    SessionSummary, ShellResponse, ShellSessionManager, ShellStatus, DEFAULT_KILL_GRACE,
    DEFAULT_WAIT_SECS, MAX_WAIT_SECS,
};
pub use session::{ShellError, ShellSession};
