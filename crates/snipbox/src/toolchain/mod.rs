//! External tool invocation
//!
//! Every compiler, formatter, linter, debugger and the user's program itself
//! runs through [`ToolCommand`]: one argv built from validated parameters,
//! one working directory, one resource envelope and one absolute timeout.
//! Source text only ever reaches a tool as a file path.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::toolchain::command::ToolCommand;
pub use crate::toolchain::process::{OutputSink, run_captured, run_streaming, run_tool};

mod command;
mod process;

/// Errors that occur while invoking an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{program}' not found")]
    NotFound { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}", describe_exit(*exit_code, *signal))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' did not finish within {seconds:.1}s")]
    TimedOut { program: String, seconds: f64 },

    #[error("I/O error while talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    }
}

/// Output channel a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    Debug,
    Trace,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
            OutputStream::Debug => "debug",
            OutputStream::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// A piece of output pushed while a tool is still running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: String,
}
