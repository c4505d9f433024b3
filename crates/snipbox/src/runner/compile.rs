//! Building the submitted source

use tracing::{debug, instrument};

use crate::config::Config;
use crate::job::Job;
use crate::report::{LineTag, Report, ReportLine, Section, classify_compiler};
use crate::runner::{JobError, tool_error};
use crate::toolchain::{ToolCommand, ToolError, run_tool};
use crate::types::ResourceLimits;
use crate::workspace::Workspace;

/// What the build produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Executable with the requested optimisation level
    Run,
    /// Assembly listing with the requested optimisation level
    Assembly,
    /// Executable with debug info and no optimisation
    Debug,
}

/// Successful build
#[derive(Debug, Clone)]
pub struct Build {
    /// Compiler warnings, empty when the build was quiet
    pub warnings: Vec<ReportLine>,
}

impl Build {
    /// Warnings as a report section, if there are any
    pub fn warnings_section(&self) -> Option<Section> {
        if self.warnings.is_empty() {
            return None;
        }
        Some(Section::Diagnostics {
            lines: self.warnings.clone(),
        })
    }
}

/// Argument list for one build, relative to the workspace
pub fn build_args(config: &Config, job: &Job, mode: BuildMode) -> Vec<String> {
    let source = format!("main.{}", job.language().extension());
    let mut args = vec![
        format!("-std={}", config.tools.standard(job.language())),
        "-fdiagnostics-color=never".to_string(),
        "-Wall".to_string(),
    ];

    match mode {
        BuildMode::Run => {
            args.push(job.optimization().to_string());
            args.extend(["-o".to_string(), "program".to_string(), source]);
            args.extend(["-pthread".to_string(), "-lm".to_string()]);
        }
        BuildMode::Assembly => {
            args.push(job.optimization().to_string());
            args.extend([
                "-S".to_string(),
                "-fno-asynchronous-unwind-tables".to_string(),
                "-o".to_string(),
                "program.s".to_string(),
                source,
            ]);
        }
        BuildMode::Debug => {
            args.extend(["-g".to_string(), "-O0".to_string()]);
            args.extend(["-o".to_string(), "program".to_string(), source]);
            args.extend(["-pthread".to_string(), "-lm".to_string()]);
        }
    }

    args
}

/// Compile the job's source inside its workspace.
///
/// A non-zero compiler exit becomes [`JobError::CompileFailed`] carrying the
/// classified diagnostics.
#[instrument(skip(config, workspace, job), fields(job = %job.id()))]
pub async fn build(
    config: &Config,
    workspace: &Workspace,
    job: &Job,
    mode: BuildMode,
) -> Result<Build, JobError> {
    let compiler = config.tools.compiler(job.language(), job.compiler());
    let limits = ResourceLimits {
        max_output: config.limits.max_output,
        ..ResourceLimits::unlimited()
    };
    let command = ToolCommand::new(compiler)
        .args(build_args(config, job, mode))
        .cwd(workspace.path())
        .limits(limits)
        .timeout(config.tools.tool_timeout());

    match run_tool(&command).await {
        Ok(exit) => {
            debug!(?mode, "build succeeded");
            Ok(Build {
                warnings: classify_compiler(&workspace.scrub(&exit.stderr)),
            })
        }
        Err(ToolError::Failed { stderr, .. }) => {
            debug!(?mode, "build failed");
            let mut lines = classify_compiler(&workspace.scrub(&stderr));
            if lines.is_empty() {
                lines.push(ReportLine::new("compilation failed", LineTag::Error));
            }
            Err(JobError::CompileFailed {
                report: Report::new().with_section(Section::Diagnostics { lines }),
            })
        }
        Err(e) => Err(tool_error(compiler, e)),
    }
}
