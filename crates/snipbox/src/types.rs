use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Signal number the kernel sends when `RLIMIT_CPU`'s soft limit is reached.
pub const SIGXCPU: i32 = 24;

/// Signal number of SIGKILL (OOM killer, `RLIMIT_CPU` hard limit, our watchdog).
pub const SIGKILL: i32 = 9;

/// Exit code a shell reports for a child killed by SIGKILL.
pub const OOM_EXIT_CODE: i32 = 128 + SIGKILL;

/// Share of the memory ceiling at which an abnormal end counts as exhaustion
///
/// Under `RLIMIT_AS` a failing `malloc` returns NULL instead of killing the
/// program, so the crash or error exit that follows carries no marker. Its peak
/// resident set sits just under the ceiling.
pub const MEMORY_CEILING_RATIO: f64 = 0.9;

/// Markers that an allocator or the kernel leaves in captured output when a
/// program ran out of memory.
pub const ALLOCATOR_FAILURE_MARKERS: [&str; 3] = ["bad_alloc", "out of memory", "Killed"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds, strictly above `time_limit`
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Virtual memory limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Resident memory limit in kilobytes
    #[serde(default)]
    pub rss_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured output per stream in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create new resource limits with the default envelope
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset
    pub fn unlimited() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            rss_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the virtual memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the resident memory limit in kilobytes
    pub fn with_rss_limit(mut self, kb: u64) -> Self {
        self.rss_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            rss_limit: overrides.rss_limit.or(self.rss_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Keep only the time and stack ceilings.
    ///
    /// Debuggers, tracers and leak-checkers reserve far more address space than
    /// the program they host, so they run without the memory ceilings.
    pub fn without_memory_ceilings(&self) -> ResourceLimits {
        ResourceLimits {
            memory_limit: None,
            rss_limit: None,
            ..self.clone()
        }
    }

    /// Wall clock timeout, falling back to `fallback` when unset
    pub fn wall_timeout(&self, fallback: Duration) -> Duration {
        self.wall_time_limit
            .map(Duration::from_secs_f64)
            .unwrap_or(fallback)
    }

    /// Output ceiling in bytes, if any
    pub fn output_cap(&self) -> Option<usize> {
        self.max_output.map(|kb| (kb * 1024) as usize)
    }

    /// CPU ceiling as a duration, if any
    pub fn cpu_ceiling(&self) -> Option<Duration> {
        self.time_limit.map(Duration::from_secs_f64)
    }

    /// Memory ceiling in kilobytes: the address space limit, else the resident one
    pub fn memory_ceiling(&self) -> Option<u64> {
        self.memory_limit.or(self.rss_limit)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(10.0),
            wall_time_limit: Some(12.0),
            memory_limit: Some(100 * Self::MB),
            rss_limit: Some(100 * Self::MB),
            stack_limit: Some(8 * Self::MB),
            max_processes: None,
            max_output: Some(Self::MB),
            max_open_files: Some(64),
        }
    }
}

/// Raw termination data of one supervised process.
///
/// Produced by the process layer and turned into an [`ExecutionOutcome`] by
/// [`ExecutionOutcome::classify`], which never looks at how completion was
/// signalled.
#[derive(Debug, Clone, Default)]
pub struct RawExit {
    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the process was killed by a signal
    pub signal: Option<i32>,

    /// Whether our wall clock watchdog killed the process
    pub timed_out: bool,

    /// Wall clock time the process ran for
    pub elapsed: Duration,

    /// Captured standard output (lossy UTF-8)
    pub stdout: String,

    /// Captured standard error (lossy UTF-8)
    pub stderr: String,

    /// Whether either stream hit the output ceiling
    pub truncated: bool,

    /// Peak resident set size in kilobytes, as reported when the process was reaped
    pub peak_memory_kb: Option<u64>,
}

impl RawExit {
    /// Whether the process exited normally with code 0
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn mentions_allocator_failure(&self) -> bool {
        ALLOCATOR_FAILURE_MARKERS
            .iter()
            .any(|marker| self.stdout.contains(marker) || self.stderr.contains(marker))
    }

    /// Whether the process crashed or exited non-zero
    fn ended_abnormally(&self) -> bool {
        self.signal.is_some() || self.exit_code != Some(0)
    }

    /// Whether peak memory reached the ceiling's neighbourhood
    fn peaked_near(&self, ceiling_kb: Option<u64>) -> bool {
        match (self.peak_memory_kb, ceiling_kb) {
            (Some(peak), Some(ceiling)) => peak as f64 >= ceiling as f64 * MEMORY_CEILING_RATIO,
            _ => false,
        }
    }
}

/// Classified result of running a compiled artifact under resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The program exited on its own, with any exit code
    #[serde(rename_all = "camelCase")]
    Completed { exit_code: i32, stdout: String },

    /// Killed by the wall clock watchdog or the CPU ceiling
    TimedOut,

    /// Killed for exhausting memory, or reported an allocator failure
    MemoryExceeded,

    /// Killed by some other signal
    Signaled { signal: i32 },

    /// The artifact could not be started at all
    ToolError { stderr: String },
}

impl ExecutionOutcome {
    /// Classify a raw exit against the limits it ran under.
    ///
    /// Priority order: watchdog or CPU ceiling, then memory, then exit code, then
    /// any remaining signal. A SIGKILL that arrives after the process has run for
    /// at least the CPU ceiling is the hard `RLIMIT_CPU` kill and counts as a
    /// timeout, not as memory. A crash or non-zero exit whose peak memory reached
    /// the memory ceiling counts as memory.
    pub fn classify(exit: &RawExit, limits: &ResourceLimits) -> Self {
        if exit.timed_out || exit.signal == Some(SIGXCPU) {
            return ExecutionOutcome::TimedOut;
        }

        let killed = exit.signal == Some(SIGKILL) || exit.exit_code == Some(OOM_EXIT_CODE);
        if killed && limits.cpu_ceiling().is_some_and(|cpu| exit.elapsed >= cpu) {
            return ExecutionOutcome::TimedOut;
        }
        let exhausted = exit.ended_abnormally() && exit.peaked_near(limits.memory_ceiling());
        if killed || exhausted || exit.mentions_allocator_failure() {
            return ExecutionOutcome::MemoryExceeded;
        }

        match (exit.exit_code, exit.signal) {
            (Some(code), _) => ExecutionOutcome::Completed {
                exit_code: code,
                stdout: exit.stdout.clone(),
            },
            (None, Some(signal)) => ExecutionOutcome::Signaled { signal },
            (None, None) => ExecutionOutcome::ToolError {
                stderr: exit.stderr.clone(),
            },
        }
    }

    /// Whether the run completed with exit code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { exit_code: 0, .. })
    }

    /// Short machine-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { exit_code: 0, .. } => "ok",
            ExecutionOutcome::Completed { .. } => "non_zero_exit",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::MemoryExceeded => "memory_exceeded",
            ExecutionOutcome::Signaled { .. } => "signaled",
            ExecutionOutcome::ToolError { .. } => "tool_error",
        }
    }

    /// Human-readable summary line
    pub fn describe(&self) -> String {
        match self {
            ExecutionOutcome::Completed { exit_code, .. } => {
                format!("Program exited with code {exit_code}")
            }
            ExecutionOutcome::TimedOut => "Execution timed out".to_string(),
            ExecutionOutcome::MemoryExceeded => "Memory limit exceeded".to_string(),
            ExecutionOutcome::Signaled { signal } => {
                format!("Program was killed by signal {signal}")
            }
            ExecutionOutcome::ToolError { .. } => "Program could not be started".to_string(),
        }
    }
}
