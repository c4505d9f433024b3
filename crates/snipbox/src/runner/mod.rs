//! Job pipeline for snipbox
//!
//! Pre-filter, workspace, toolchain, classifier: [`Runner::run_job`] takes a
//! validated [`Job`] through every step and always removes its workspace.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub use crate::runner::compile::{Build, BuildMode, build, build_args};
pub use crate::runner::execute::{Execution, execute, execute_in, wall_clock};

mod analyze;
mod compile;
mod execute;
mod interactive;

use crate::config::Config;
use crate::filter::{self, Rejection};
use crate::job::{Action, Job};
use crate::report::{Report, Section};
use crate::toolchain::{OutputChunk, ToolError};
use crate::workspace::{Workspace, WorkspaceError, WorkspacePool};

/// Who is to blame for a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or code that does not build
    Client,
    /// The program ran and misbehaved
    Execution,
    /// Infrastructure fault
    Server,
}

/// Errors that end a job without a normal report
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("compilation failed")]
    CompileFailed { report: Report },

    #[error("{tool} failed")]
    ToolFailed { tool: String, report: Report },

    #[error("a job is already running in this session")]
    Busy,

    #[error("server is at capacity, try again later")]
    AtCapacity,

    #[error("toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    #[error("workspace failure: {0}")]
    Workspace(#[source] WorkspaceError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WorkspaceError> for JobError {
    fn from(error: WorkspaceError) -> Self {
        match error {
            WorkspaceError::AtCapacity(_) => JobError::AtCapacity,
            other => JobError::Workspace(other),
        }
    }
}

impl JobError {
    pub fn class(&self) -> ErrorClass {
        match self {
            JobError::Rejected(_)
            | JobError::CompileFailed { .. }
            | JobError::ToolFailed { .. }
            | JobError::Busy => ErrorClass::Client,
            JobError::AtCapacity
            | JobError::ToolchainUnavailable(_)
            | JobError::Workspace(_)
            | JobError::Internal(_) => ErrorClass::Server,
        }
    }

    /// HTTP-style status code
    pub fn status_code(&self) -> u16 {
        match self {
            JobError::Rejected(_) | JobError::CompileFailed { .. } | JobError::ToolFailed { .. } => {
                400
            }
            JobError::Busy => 429,
            JobError::AtCapacity => 503,
            JobError::ToolchainUnavailable(_) | JobError::Workspace(_) | JobError::Internal(_) => {
                500
            }
        }
    }

    /// Machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Rejected(_) => "rejected",
            JobError::CompileFailed { .. } => "compile_failed",
            JobError::ToolFailed { .. } => "tool_failed",
            JobError::Busy => "busy",
            JobError::AtCapacity => "at_capacity",
            JobError::ToolchainUnavailable(_) => "toolchain_unavailable",
            JobError::Workspace(_) => "workspace",
            JobError::Internal(_) => "internal",
        }
    }

    /// Diagnostics attached to the failure, if any
    pub fn report(&self) -> Option<&Report> {
        match self {
            JobError::CompileFailed { report } | JobError::ToolFailed { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }

    /// Message safe to show a client; server faults stay generic
    pub fn client_message(&self) -> String {
        match self.class() {
            ErrorClass::Server if !matches!(self, JobError::AtCapacity) => {
                "internal error while running the job".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Class of a finished report
pub fn report_class(report: &Report) -> Option<ErrorClass> {
    report.has_failed_outcome().then_some(ErrorClass::Execution)
}

/// HTTP-style status of a finished report
pub fn report_status(report: &Report) -> u16 {
    match report_class(report) {
        Some(_) => 422,
        None => 200,
    }
}

pub(crate) fn tool_error(tool: &str, error: ToolError) -> JobError {
    match error {
        ToolError::NotFound { .. } => JobError::ToolchainUnavailable(format!("'{tool}' not found")),
        ToolError::Spawn { source, .. } | ToolError::Io { source, .. } => {
            JobError::ToolchainUnavailable(format!("'{tool}': {source}"))
        }
        ToolError::Failed { .. } | ToolError::TimedOut { .. } => JobError::ToolFailed {
            tool: tool.to_string(),
            report: Report::new().with_section(Section::Diagnostics {
                lines: vec![crate::report::ReportLine::new(
                    error.to_string(),
                    crate::report::LineTag::Error,
                )],
            }),
        },
    }
}

/// Live channels of one job
#[derive(Debug, Default)]
pub struct JobContext {
    /// Where debug and trace output is pushed as it arrives
    pub output: Option<mpsc::Sender<OutputChunk>>,
    /// Bytes for the debugged or traced program's stdin
    pub input: Option<mpsc::Receiver<Vec<u8>>>,
}

impl JobContext {
    pub fn streaming(
        output: mpsc::Sender<OutputChunk>,
        input: Option<mpsc::Receiver<Vec<u8>>>,
    ) -> Self {
        Self {
            output: Some(output),
            input,
        }
    }
}

/// High-level runner for jobs
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    pool: WorkspacePool,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        let pool = WorkspacePool::new(
            config.temp_root.clone(),
            config.max_concurrent_jobs,
            config.queue_timeout(),
        );
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &WorkspacePool {
        &self.pool
    }

    /// Screen source text without running anything
    pub fn prefilter(&self, job: &Job) -> Result<(), Rejection> {
        filter::check(job.source(), &self.config.source_limits)
    }

    /// Run one job to completion.
    ///
    /// The workspace is destroyed on every path out of this function. If the
    /// returned future is dropped mid-job, the workspace's own drop removes
    /// the directory and the process layer kills every child.
    #[instrument(skip(self, job, ctx), fields(job = %job.id(), action = %job.action()))]
    pub async fn run_job(&self, job: &Job, ctx: JobContext) -> Result<Report, JobError> {
        self.prefilter(job)?;

        let mut workspace = self.pool.acquire().await?;
        let result = self.dispatch(&workspace, job, ctx).await;

        if let Err(e) = workspace.destroy().await {
            warn!(error = %e, "workspace cleanup failed");
        }

        match &result {
            Ok(report) => info!(
                outcome = report.outcome.as_ref().map(|o| o.label()),
                "job finished"
            ),
            Err(e) if e.class() == ErrorClass::Server => {
                warn!(kind = e.kind(), error = %e, "job failed on the server side")
            }
            Err(e) => info!(kind = e.kind(), "job failed"),
        }
        result
    }

    async fn dispatch(
        &self,
        workspace: &Workspace,
        job: &Job,
        ctx: JobContext,
    ) -> Result<Report, JobError> {
        let config = &*self.config;
        workspace
            .write_source(job.language(), job.source())
            .await?;
        debug!("source written");

        match job.action() {
            Action::Compile => self.compile_and_run(workspace, job).await,
            Action::Assembly => self.assembly(workspace, job).await,
            Action::Both => {
                let mut report = self.assembly(workspace, job).await?;
                report.extend(self.compile_and_run(workspace, job).await?);
                Ok(report)
            }
            Action::Format => analyze::format(config, workspace, job).await,
            Action::Lint => analyze::lint(config, workspace, job).await,
            Action::Memcheck => analyze::memcheck(config, workspace, job).await,
            Action::Debug => interactive::debug(config, workspace, job, ctx).await,
            Action::Trace => interactive::trace(config, workspace, job, ctx).await,
        }
    }

    async fn compile_and_run(&self, workspace: &Workspace, job: &Job) -> Result<Report, JobError> {
        let built = build(&self.config, workspace, job, BuildMode::Run).await?;
        let mut report = Report::new();
        if let Some(section) = built.warnings_section() {
            report.push(section);
        }
        report.extend(execute_in(workspace, &self.config.limits).await);
        Ok(report)
    }

    async fn assembly(&self, workspace: &Workspace, job: &Job) -> Result<Report, JobError> {
        build(&self.config, workspace, job, BuildMode::Assembly).await?;
        let text = tokio::fs::read_to_string(workspace.assembly_path())
            .await
            .map_err(|e| {
                JobError::ToolchainUnavailable(format!("compiler wrote no assembly: {e}"))
            })?;
        Ok(Report::new().with_section(Section::Assembly {
            text: workspace.scrub(&text),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Compiler, JobRequest, Language};
    use crate::types::ExecutionOutcome;

    fn runner(root: &std::path::Path) -> Runner {
        let mut config = Config::builtin();
        config.temp_root = root.to_path_buf();
        config.max_concurrent_jobs = 1;
        config.queue_timeout = 0.05;
        Runner::new(config)
    }

    fn job(code: &str, action: Action) -> Job {
        Job::from_request(JobRequest {
            code: code.to_string(),
            lang: Language::C,
            compiler: Compiler::Gcc,
            optimization: "-O0".to_string(),
            action,
        })
        .unwrap()
    }

    fn workspaces(root: &std::path::Path) -> usize {
        std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
    }

    #[test]
    fn runner_creation() {
        let runner = Runner::with_defaults();
        assert_eq!(runner.config().source_limits.max_chars, 50_000);
        assert_eq!(runner.pool().capacity(), 8);
    }

    #[tokio::test]
    async fn rejected_job_never_creates_a_workspace() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path());

        let err = runner
            .run_job(&job("int main() { system(\"ls\"); }", Action::Compile), JobContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Rejected(_)));
        assert_eq!(err.status_code(), 400);
        assert_eq!(workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn oversized_job_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path());
        let code = "x".repeat(50_001);
        let err = runner
            .run_job(&job(&code, Action::Compile), JobContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Rejected(Rejection::TooLong { .. })));
    }

    #[tokio::test]
    async fn missing_compiler_is_server_fault_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::builtin();
        config.temp_root = root.path().to_path_buf();
        config.tools.gcc = "snipbox-missing-gcc".to_string();
        let runner = Runner::new(config);

        let err = runner
            .run_job(&job("int main(void) { return 0; }", Action::Compile), JobContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ToolchainUnavailable(_)));
        assert_eq!(err.class(), ErrorClass::Server);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.client_message(), "internal error while running the job");
        assert_eq!(workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn at_capacity_maps_to_503() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path());
        let mut held = runner.pool().acquire().await.unwrap();

        let err = runner
            .run_job(&job("int main(void) { return 0; }", Action::Format), JobContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::AtCapacity));
        assert_eq!(err.status_code(), 503);
        held.destroy().await.unwrap();
    }

    #[test]
    fn status_mapping() {
        assert_eq!(JobError::Busy.status_code(), 429);
        assert_eq!(JobError::Busy.kind(), "busy");
        let failed = JobError::CompileFailed {
            report: Report::new(),
        };
        assert_eq!(failed.class(), ErrorClass::Client);
        assert!(failed.report().is_some());
    }

    #[test]
    fn report_status_reflects_outcome() {
        let mut report = Report::new();
        assert_eq!(report_status(&report), 200);

        report.outcome = Some(ExecutionOutcome::Completed {
            exit_code: 0,
            stdout: String::new(),
        });
        assert_eq!(report_status(&report), 200);

        for outcome in [
            ExecutionOutcome::TimedOut,
            ExecutionOutcome::MemoryExceeded,
            ExecutionOutcome::Completed {
                exit_code: 1,
                stdout: String::new(),
            },
        ] {
            report.outcome = Some(outcome);
            assert_eq!(report_status(&report), 422);
            assert_eq!(report_class(&report), Some(ErrorClass::Execution));
        }
    }

    #[tokio::test]
    async fn tool_error_mapping() {
        let err = tool_error(
            "gcc",
            ToolError::TimedOut {
                program: "gcc".to_string(),
                seconds: 15.0,
            },
        );
        assert!(matches!(err, JobError::ToolFailed { .. }));
        assert_eq!(err.status_code(), 400);

        let err = tool_error(
            "gcc",
            ToolError::NotFound {
                program: "gcc".to_string(),
            },
        );
        assert!(matches!(err, JobError::ToolchainUnavailable(_)));
    }
}
