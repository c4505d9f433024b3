//! Execution supervisor
//!
//! Runs a compiled artifact under the full resource envelope and classifies
//! how it ended.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::report::{Report, Section};
use crate::toolchain::{ToolCommand, run_captured};
use crate::types::{ExecutionOutcome, RawExit, ResourceLimits};
use crate::workspace::Workspace;

/// Extra wall clock time granted over the CPU ceiling when no wall limit is set
const WALL_MARGIN: f64 = 2.0;

/// Wall clock limit used when neither a wall nor a CPU ceiling is set
const FALLBACK_WALL: Duration = Duration::from_secs(12);

/// A finished run
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    pub exit: RawExit,
}

/// Wall clock timeout for a run under `limits`
pub fn wall_clock(limits: &ResourceLimits) -> Duration {
    let fallback = limits
        .time_limit
        .map(|cpu| Duration::from_secs_f64(cpu + WALL_MARGIN))
        .unwrap_or(FALLBACK_WALL);
    limits.wall_timeout(fallback)
}

/// Run `binary` in `workdir` and classify the result.
///
/// Never fails: an artifact that cannot be started is
/// [`ExecutionOutcome::ToolError`].
#[instrument(skip(limits))]
pub async fn execute(binary: &Path, workdir: &Path, limits: &ResourceLimits) -> Execution {
    let command = ToolCommand::new(binary.to_string_lossy())
        .cwd(workdir)
        .limits(limits.clone())
        .timeout(wall_clock(limits))
        .allow_nonzero(true);

    let exit = match run_captured(&command).await {
        Ok(exit) => exit,
        Err(e) => {
            debug!(error = %e, "artifact could not be started");
            RawExit {
                stderr: e.to_string(),
                ..Default::default()
            }
        }
    };

    let outcome = ExecutionOutcome::classify(&exit, limits);
    debug!(outcome = outcome.label(), "execution classified");

    Execution { outcome, exit }
}

/// Run the workspace's binary and turn the result into a report
pub async fn execute_in(workspace: &Workspace, limits: &ResourceLimits) -> Report {
    let mut execution = execute(&workspace.binary_path(), workspace.path(), limits).await;
    execution.exit.stdout = workspace.scrub(&execution.exit.stdout);
    execution.exit.stderr = workspace.scrub(&execution.exit.stderr);
    if let ExecutionOutcome::Completed { ref mut stdout, .. } = execution.outcome {
        stdout.clone_from(&execution.exit.stdout);
    }

    let mut report = Report::new().with_section(Section::ProgramOutput {
        text: execution.exit.stdout.clone(),
    });
    if !execution.exit.stderr.is_empty() {
        report.push(Section::ProgramErrors {
            text: execution.exit.stderr.clone(),
        });
    }
    report.truncated = execution.exit.truncated;
    report.outcome = Some(execution.outcome);
    report
}
