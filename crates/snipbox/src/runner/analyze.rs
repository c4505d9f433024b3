//! Formatter, linter and leak-checker runs

use tracing::{debug, instrument};

use crate::config::Config;
use crate::job::Job;
use crate::report::{LineTag, OutputSource, Report, ReportLine, Section, classify};
use crate::runner::compile::{BuildMode, build};
use crate::runner::{JobError, tool_error};
use crate::toolchain::{ToolCommand, ToolError, run_captured, run_tool};
use crate::types::{ExecutionOutcome, ResourceLimits};
use crate::workspace::Workspace;

fn tool_limits(config: &Config) -> ResourceLimits {
    ResourceLimits {
        max_output: config.limits.max_output,
        ..ResourceLimits::unlimited()
    }
}

/// Map a failed formatter or linter run to a client-facing error
fn analysis_failure(tool: &str, workspace: &Workspace, error: ToolError) -> JobError {
    let message = match error {
        ToolError::Failed { stderr, .. } => workspace.scrub(&stderr),
        ToolError::TimedOut { seconds, .. } => format!("{tool} did not finish within {seconds:.0}s"),
        other => return tool_error(tool, other),
    };
    let lines = message
        .lines()
        .map(|line| ReportLine::new(line, LineTag::Error))
        .collect();
    JobError::ToolFailed {
        tool: tool.to_string(),
        report: Report::new().with_section(Section::Diagnostics { lines }),
    }
}

/// Format the source; the output is returned untouched
#[instrument(skip_all, fields(job = %job.id()))]
pub async fn format(config: &Config, workspace: &Workspace, job: &Job) -> Result<Report, JobError> {
    let tool = &config.tools.clang_format;
    let source = format!("main.{}", job.language().extension());
    let command = ToolCommand::new(tool)
        .arg(format!("--style={}", config.tools.format_style))
        .arg(source)
        .cwd(workspace.path())
        .limits(tool_limits(config))
        .timeout(config.tools.tool_timeout());

    let exit = run_tool(&command)
        .await
        .map_err(|e| analysis_failure(tool, workspace, e))?;

    Ok(Report::new().with_section(Section::Formatted { text: exit.stdout }))
}

/// Run the static analyser over the source
#[instrument(skip_all, fields(job = %job.id()))]
pub async fn lint(config: &Config, workspace: &Workspace, job: &Job) -> Result<Report, JobError> {
    let tool = &config.tools.cppcheck;
    let source = format!("main.{}", job.language().extension());
    let command = ToolCommand::new(tool)
        .args([
            "--enable=all",
            "--quiet",
            "--template={file}:{line}:{column}: {severity}: {message} [{id}]",
        ])
        .arg(format!("--language={}", job.language().tool_name()))
        .arg(source)
        .cwd(workspace.path())
        .limits(tool_limits(config))
        .timeout(config.tools.tool_timeout());

    let exit = run_tool(&command)
        .await
        .map_err(|e| analysis_failure(tool, workspace, e))?;

    Ok(classify(&workspace.scrub(&exit.stderr), OutputSource::Linter))
}

/// Build with debug info and run under the leak checker.
///
/// The checker's exit code says nothing about success; the log file does.
#[instrument(skip_all, fields(job = %job.id()))]
pub async fn memcheck(
    config: &Config,
    workspace: &Workspace,
    job: &Job,
) -> Result<Report, JobError> {
    let built = build(config, workspace, job, BuildMode::Debug).await?;

    let tool = &config.tools.valgrind;
    let command = ToolCommand::new(tool)
        .args(["--leak-check=full", "--log-file=valgrind.log", "./program"])
        .cwd(workspace.path())
        .limits(config.limits.without_memory_ceilings())
        .timeout(config.tools.interactive_timeout())
        .allow_nonzero(true);

    let exit = run_captured(&command).await.map_err(|e| tool_error(tool, e))?;

    let log = match tokio::fs::read_to_string(workspace.valgrind_log_path()).await {
        Ok(log) => log,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && exit.timed_out => String::new(),
        Err(e) => {
            debug!(error = %e, "leak checker wrote no log");
            return Err(JobError::ToolchainUnavailable(format!(
                "{tool} produced no log file"
            )));
        }
    };

    let mut report = Report::new();
    if let Some(section) = built.warnings_section() {
        report.push(section);
    }
    report.push(Section::ProgramOutput {
        text: workspace.scrub(&exit.stdout),
    });
    report.extend(classify(&workspace.scrub(&log), OutputSource::LeakChecker));
    report.truncated |= exit.truncated;
    if exit.timed_out {
        report.outcome = Some(ExecutionOutcome::TimedOut);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_tool_becomes_tool_failed_report() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        let error = ToolError::Failed {
            program: "clang-format".to_string(),
            exit_code: Some(1),
            signal: None,
            stderr: format!("{}/main.c: invalid\n", workspace.path().display()),
        };

        let err = analysis_failure("clang-format", &workspace, error);
        let JobError::ToolFailed { tool, report } = err else {
            panic!("expected ToolFailed");
        };
        assert_eq!(tool, "clang-format");
        assert_eq!(report.to_text(), "main.c: invalid\n");
        workspace.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        let error = ToolError::NotFound {
            program: "cppcheck".to_string(),
        };
        assert!(matches!(
            analysis_failure("cppcheck", &workspace, error),
            JobError::ToolchainUnavailable(_)
        ));
        workspace.destroy().await.unwrap();
    }
}
