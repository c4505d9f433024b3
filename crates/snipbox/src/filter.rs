//! Static pre-filter
//!
//! Screens source text before any process is spawned. This is a lexical
//! filter, not a parser. It over-rejects (an identifier such as `my_system(`
//! contains `system(`) and under-rejects (calls hidden behind macros, token
//! pasting, function pointers or whitespace before the parenthesis pass). It
//! narrows what reaches the compiler; it is not a security boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a call name is denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCategory {
    ProcessControl,
    Networking,
    Filesystem,
    Privilege,
    Shell,
    InlineAssembly,
    UnsafeLibc,
}

/// One denylisted call name, matched as `name(`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeniedCall {
    pub name: &'static str,
    pub category: DenyCategory,
}

const fn deny(name: &'static str, category: DenyCategory) -> DeniedCall {
    DeniedCall { name, category }
}

/// Call names rejected by the pre-filter
pub const DENYLIST: &[DeniedCall] = &[
    // process control
    deny("fork", DenyCategory::ProcessControl),
    deny("vfork", DenyCategory::ProcessControl),
    deny("clone", DenyCategory::ProcessControl),
    deny("execl", DenyCategory::ProcessControl),
    deny("execlp", DenyCategory::ProcessControl),
    deny("execle", DenyCategory::ProcessControl),
    deny("execv", DenyCategory::ProcessControl),
    deny("execvp", DenyCategory::ProcessControl),
    deny("execvpe", DenyCategory::ProcessControl),
    deny("execve", DenyCategory::ProcessControl),
    deny("posix_spawn", DenyCategory::ProcessControl),
    deny("kill", DenyCategory::ProcessControl),
    deny("ptrace", DenyCategory::ProcessControl),
    deny("prctl", DenyCategory::ProcessControl),
    // raw networking
    deny("socket", DenyCategory::Networking),
    deny("connect", DenyCategory::Networking),
    deny("bind", DenyCategory::Networking),
    deny("listen", DenyCategory::Networking),
    deny("accept", DenyCategory::Networking),
    deny("sendto", DenyCategory::Networking),
    deny("recvfrom", DenyCategory::Networking),
    // raw filesystem syscalls
    deny("unlink", DenyCategory::Filesystem),
    deny("unlinkat", DenyCategory::Filesystem),
    deny("rmdir", DenyCategory::Filesystem),
    deny("rename", DenyCategory::Filesystem),
    deny("chmod", DenyCategory::Filesystem),
    deny("chown", DenyCategory::Filesystem),
    deny("mount", DenyCategory::Filesystem),
    deny("umount", DenyCategory::Filesystem),
    deny("symlink", DenyCategory::Filesystem),
    deny("truncate", DenyCategory::Filesystem),
    // signals and privilege escalation
    deny("signal", DenyCategory::Privilege),
    deny("sigaction", DenyCategory::Privilege),
    deny("setuid", DenyCategory::Privilege),
    deny("setgid", DenyCategory::Privilege),
    deny("seteuid", DenyCategory::Privilege),
    deny("setegid", DenyCategory::Privilege),
    deny("setreuid", DenyCategory::Privilege),
    deny("chroot", DenyCategory::Privilege),
    // shell invocation
    deny("system", DenyCategory::Shell),
    deny("popen", DenyCategory::Shell),
    // inline assembly
    deny("asm", DenyCategory::InlineAssembly),
    deny("__asm__", DenyCategory::InlineAssembly),
    // unsafe libc
    deny("gets", DenyCategory::UnsafeLibc),
    deny("syscall", DenyCategory::UnsafeLibc),
    deny("dlopen", DenyCategory::UnsafeLibc),
    deny("mprotect", DenyCategory::UnsafeLibc),
];

/// Ceilings on submitted source text
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceLimits {
    /// Maximum length in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Maximum number of lines
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_chars() -> usize {
    50_000
}

fn default_max_lines() -> usize {
    1_000
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_lines: default_max_lines(),
        }
    }
}

/// Reason a request was refused before reaching any tool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("source code is empty")]
    Empty,

    #[error("source code is too long ({chars} characters, limit {max})")]
    TooLong { chars: usize, max: usize },

    #[error("source code has too many lines ({lines} lines, limit {max})")]
    TooManyLines { lines: usize, max: usize },

    #[error("source code calls '{name}', which is not allowed")]
    Denylisted {
        name: &'static str,
        category: DenyCategory,
    },

    #[error("invalid {option}: {value:?}")]
    InvalidOption { option: &'static str, value: String },
}

/// Screen source text.
///
/// Checks run cheapest first: emptiness, length, line count, then the
/// denylist.
pub fn check(source: &str, limits: &SourceLimits) -> Result<(), Rejection> {
    if source.trim().is_empty() {
        return Err(Rejection::Empty);
    }

    let chars = source.chars().count();
    if chars > limits.max_chars {
        return Err(Rejection::TooLong {
            chars,
            max: limits.max_chars,
        });
    }

    let lines = source.lines().count();
    if lines > limits.max_lines {
        return Err(Rejection::TooManyLines {
            lines,
            max: limits.max_lines,
        });
    }

    match find_denied_call(source) {
        Some(call) => Err(Rejection::Denylisted {
            name: call.name,
            category: call.category,
        }),
        None => Ok(()),
    }
}

/// First denylisted call whose `name(` appears in `source`
pub fn find_denied_call(source: &str) -> Option<&'static DeniedCall> {
    DENYLIST.iter().find(|call| {
        source
            .match_indices(call.name)
            .any(|(at, _)| source[at + call.name.len()..].starts_with('('))
    })
}
