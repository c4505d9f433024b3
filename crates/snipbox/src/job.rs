//! Job model
//!
//! A [`JobRequest`] is what a client sends. It becomes an immutable [`Job`]
//! once its parameters have been validated.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::Rejection;

/// Optimisation flags a request may choose from
pub const OPTIMIZATION_LEVELS: [&str; 7] = ["-O0", "-O1", "-O2", "-O3", "-Os", "-Og", "-Ofast"];

/// Source language of a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    /// Source file extension, without the dot
    pub fn extension(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    /// Language name as cppcheck and clang-format expect it
    pub fn tool_name(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "c++",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Compiler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    #[default]
    Gcc,
    Clang,
}

/// What the client wants done with the snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Compile,
    Assembly,
    Both,
    Format,
    Lint,
    Memcheck,
    Debug,
    Trace,
}

impl Action {
    /// Whether the action streams incremental output
    pub fn is_interactive(self) -> bool {
        matches!(self, Action::Debug | Action::Trace)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Compile => "compile",
            Action::Assembly => "assembly",
            Action::Both => "both",
            Action::Format => "format",
            Action::Lint => "lint",
            Action::Memcheck => "memcheck",
            Action::Debug => "debug",
            Action::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Wire form of a job request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub code: String,
    pub lang: Language,
    #[serde(default)]
    pub compiler: Compiler,
    #[serde(default = "default_optimization")]
    pub optimization: String,
    pub action: Action,
}

fn default_optimization() -> String {
    "-O0".to_string()
}

/// Identifier of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A validated, immutable unit of work
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    language: Language,
    source: String,
    compiler: Compiler,
    optimization: &'static str,
    action: Action,
}

impl Job {
    /// Validate a request into a job.
    ///
    /// Only the optimisation flag is checked here; source text is screened by
    /// the pre-filter when the job is dispatched.
    pub fn from_request(request: JobRequest) -> Result<Self, Rejection> {
        let optimization = OPTIMIZATION_LEVELS
            .iter()
            .copied()
            .find(|level| *level == request.optimization.trim())
            .ok_or_else(|| Rejection::InvalidOption {
                option: "optimization",
                value: request.optimization.clone(),
            })?;

        Ok(Self {
            id: JobId::new(),
            language: request.lang,
            source: request.code,
            compiler: request.compiler,
            optimization,
            action: request.action,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn compiler(&self) -> Compiler {
        self.compiler
    }

    pub fn optimization(&self) -> &'static str {
        self.optimization
    }

    pub fn action(&self) -> Action {
        self.action
    }
}
