//! Debugger and tracer runs
//!
//! Both stream their output while they run. Chunks pass through a forwarder
//! that strips workspace paths before they reach the client.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::job::Job;
use crate::report::{Report, Section};
use crate::runner::compile::{BuildMode, build};
use crate::runner::{JobContext, JobError, tool_error};
use crate::toolchain::{
    OutputChunk, OutputSink, OutputStream, ToolCommand, run_captured, run_streaming,
};
use crate::types::{ExecutionOutcome, RawExit};
use crate::workspace::Workspace;

const FORWARD_BUFFER: usize = 64;

/// Run the program under gdb and report the transcript
#[instrument(skip_all, fields(job = %job.id()))]
pub async fn debug(
    config: &Config,
    workspace: &Workspace,
    job: &Job,
    ctx: JobContext,
) -> Result<Report, JobError> {
    let built = build(config, workspace, job, BuildMode::Debug).await?;

    let gdb = &config.tools.gdb;
    let command = ToolCommand::new(gdb)
        .args(["-q", "-nx", "-batch", "-ex", "run", "-ex", "bt", "--args"])
        .arg("./program")
        .cwd(workspace.path())
        .limits(config.limits.without_memory_ceilings())
        .timeout(config.tools.interactive_timeout())
        .allow_nonzero(true);

    let exit = run_interactive(
        &command,
        workspace,
        ctx,
        OutputStream::Debug,
        OutputStream::Debug,
    )
    .await
    .map_err(|e| tool_error(gdb, e))?;

    let mut transcript = exit.stdout.clone();
    transcript.push_str(&exit.stderr);

    let mut report = Report::new();
    if let Some(section) = built.warnings_section() {
        report.push(section);
    }
    report.push(Section::Debug { text: transcript });
    report.truncated = exit.truncated;
    if exit.timed_out {
        report.outcome = Some(ExecutionOutcome::TimedOut);
    }
    Ok(report)
}

/// Run the program under strace and report its output and the trace
#[instrument(skip_all, fields(job = %job.id()))]
pub async fn trace(
    config: &Config,
    workspace: &Workspace,
    job: &Job,
    ctx: JobContext,
) -> Result<Report, JobError> {
    let built = build(config, workspace, job, BuildMode::Run).await?;

    let strace = &config.tools.strace;
    let command = ToolCommand::new(strace)
        .args(["-f", "-qq", "./program"])
        .cwd(workspace.path())
        .limits(config.limits.clone())
        .timeout(config.tools.interactive_timeout())
        .allow_nonzero(true);

    let exit = run_interactive(
        &command,
        workspace,
        ctx,
        OutputStream::Stdout,
        OutputStream::Trace,
    )
    .await
    .map_err(|e| tool_error(strace, e))?;

    // strace exits the way the traced program did
    let outcome = ExecutionOutcome::classify(&exit, &config.limits);

    let mut report = Report::new();
    if let Some(section) = built.warnings_section() {
        report.push(section);
    }
    report.push(Section::ProgramOutput {
        text: exit.stdout.clone(),
    });
    report.push(Section::Trace {
        text: exit.stderr.clone(),
    });
    report.truncated = exit.truncated;
    report.outcome = Some(outcome);
    Ok(report)
}

/// Run a command, streaming when the context asks for it, and scrub the result
async fn run_interactive(
    command: &ToolCommand,
    workspace: &Workspace,
    ctx: JobContext,
    stdout: OutputStream,
    stderr: OutputStream,
) -> Result<RawExit, crate::toolchain::ToolError> {
    let mut exit = match ctx.output {
        Some(output) => {
            let (sender, forwarder) = scrubbing_forwarder(workspace, output);
            let sink = OutputSink {
                sender,
                stdout,
                stderr,
            };
            let result = run_streaming(command, sink, ctx.input).await;
            // the sink is gone, so the forwarder drains and stops
            if let Err(e) = forwarder.await {
                warn!(error = %e, "output forwarder failed");
            }
            result?
        }
        None => run_captured(command).await?,
    };

    exit.stdout = workspace.scrub(&exit.stdout);
    exit.stderr = workspace.scrub(&exit.stderr);
    debug!(timed_out = exit.timed_out, "interactive run finished");
    Ok(exit)
}

/// Channel whose chunks are scrubbed and passed on to `output`
fn scrubbing_forwarder(
    workspace: &Workspace,
    output: mpsc::Sender<OutputChunk>,
) -> (mpsc::Sender<OutputChunk>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<OutputChunk>(FORWARD_BUFFER);
    let mut scrubber = StreamScrubber::new(&workspace.path().to_string_lossy());

    // keep draining after the client is gone so the producer never blocks
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = receiver.recv().await {
            if let Some(chunk) = scrubber.feed(chunk) {
                let _ = output.send(chunk).await;
            }
        }
        for chunk in scrubber.finish() {
            let _ = output.send(chunk).await;
        }
    });

    (sender, forwarder)
}

/// Strips the workspace path from chunked output.
///
/// Reads split output at arbitrary points, so a chunk may end partway through
/// the path. That tail is held back per stream and completed by the next chunk.
struct StreamScrubber {
    path: String,
    prefix: String,
    pending: Vec<(OutputStream, String)>,
}

impl StreamScrubber {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            prefix: format!("{path}/"),
            pending: Vec::new(),
        }
    }

    /// Scrub everything that cannot be the start of a cut-off path
    fn feed(&mut self, chunk: OutputChunk) -> Option<OutputChunk> {
        let mut text = match self.pending.iter().position(|(s, _)| *s == chunk.stream) {
            Some(index) => self.pending.swap_remove(index).1,
            None => String::new(),
        };
        text.push_str(&chunk.data);

        let held = partial_suffix(&text, &self.prefix);
        let tail = text.split_off(text.len() - held);
        if !tail.is_empty() {
            self.pending.push((chunk.stream, tail));
        }
        if text.is_empty() {
            return None;
        }
        Some(OutputChunk {
            stream: chunk.stream,
            data: self.scrub(&text),
        })
    }

    /// Held-back tails, once the stream has ended
    fn finish(&mut self) -> Vec<OutputChunk> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(stream, text)| OutputChunk {
                stream,
                data: self.scrub(&text),
            })
            .collect()
    }

    fn scrub(&self, text: &str) -> String {
        text.replace(&self.prefix, "").replace(&self.path, ".")
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `needle`
fn partial_suffix(text: &str, needle: &str) -> usize {
    (1..needle.len().min(text.len() + 1))
        .rev()
        .find(|&len| needle.is_char_boundary(len) && text.ends_with(&needle[..len]))
        .unwrap_or(0)
}
