//! Command builder for external tools

use std::path::PathBuf;
use std::time::Duration;

use crate::types::ResourceLimits;

/// Environment variables passed through from the server
const INHERITED_ENV: [&str; 2] = ["PATH", "HOME"];

/// Builder for one external tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    limits: ResourceLimits,
    timeout: Duration,
    stdin: Option<Vec<u8>>,
    allow_nonzero: bool,
}

impl ToolCommand {
    /// Create a new command with no resource limits and a 10 second timeout
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            limits: ResourceLimits::unlimited(),
            timeout: Duration::from_secs(10),
            stdin: None,
            allow_nonzero: false,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the resource envelope applied in the child before exec
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the absolute wall clock timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Feed fixed bytes to stdin, then close it
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Treat a non-zero exit as a normal result
    pub fn allow_nonzero(mut self, allow: bool) -> Self {
        self.allow_nonzero = allow;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn allows_nonzero(&self) -> bool {
        self.allow_nonzero
    }

    /// Build the command, without stdio or the pre-exec hook
    pub(crate) fn to_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        command.env_clear();
        for key in INHERITED_ENV {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        // Keep tool messages in English so output markers stay recognisable
        command.env("LC_ALL", "C");
        if let Some(ref cwd) = self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}
