//! A library for compiling, running and analysing untrusted C/C++ snippets.
//!
//! Snipbox takes a source submission through a fixed pipeline: a static
//! pre-filter, a disposable per-job workspace, an external toolchain
//! (compiler, formatter, linter, leak checker, debugger, tracer), an execution
//! supervisor with hard resource ceilings, and a classifier that turns raw
//! tool output into a structured report.
//!
//! # Features
//!
//! - **Pre-filter**: size, line-count and call denylist checks that never spawn a process.
//! - **Workspaces**: one uniquely named directory per job, removed on every exit path.
//! - **Resource envelope**: CPU, memory, stack, process and output ceilings per run.
//! - **Outcome classification**: timeout, memory exhaustion, signal and exit code.
//! - **Report formatting**: structured compiler, linter and leak-checker diagnostics.
//! - **Sessions**: heartbeat-supervised connections carrying sequential, cancellable jobs.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, SessionConfig};
pub use filter::{Rejection, SourceLimits};
pub use job::{Action, Compiler, Job, JobId, JobRequest, Language};
pub use report::{LineTag, OutputSource, Report, Section};
pub use runner::{ErrorClass, JobContext, JobError, Runner, report_status};
pub use session::{
    ClientMessage, CloseReason, Inbound, JobExecutor, ServerMessage, Session, SessionId,
    SessionRegistry, SessionState,
};
pub use toolchain::{OutputChunk, OutputStream, ToolCommand, ToolError};
pub use types::{ExecutionOutcome, RawExit, ResourceLimits};
pub use workspace::{Workspace, WorkspaceError, WorkspacePool};

pub mod config;
pub mod filter;
pub mod job;
pub mod report;
pub mod runner;
pub mod session;
pub mod toolchain;
pub mod types;
pub mod workspace;
