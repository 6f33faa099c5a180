//! Persistent code-execution sandbox
//!
//! Scripts are written in Rhai and run on a blocking thread with a wall-clock
//! limit, an operation budget and an explicit module allow-list. State carries
//! across executions through an [`ExecutionScope`].
//!
//! # Example
//! ```ignore
//! let sandbox = CodeSandbox::with_limits(&["math"], Duration::from_secs(5));
//! let mut scope = sandbox.initial_scope();
//! let outcome = sandbox.execute("let x = math::sqrt(16);", &scope).await;
//! scope.merge(outcome.delta);
//! ```

pub mod executor;
pub mod modules;
pub mod scope;

pub use executor::{CodeSandbox, ExecutionOutcome, SandboxError};
pub use modules::{ModuleCatalogue, AVAILABLE_MODULES};
pub use scope::{dynamic_to_json, ExecutionScope, ScopeDelta};
