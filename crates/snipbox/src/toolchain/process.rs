//! Process spawning and I/O
//!
//! Every child runs in its own process group with its resource envelope
//! applied between fork and exec. The group is killed when the watchdog
//! fires, after the leader exits, and when the running future is dropped, so
//! no descendant outlives the call. The leader is reaped with `wait4` so its
//! peak memory use is known.

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::resource::{Resource, setrlimit};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, instrument, warn};

use crate::toolchain::command::ToolCommand;
use crate::toolchain::{OutputChunk, OutputStream, ToolError};
use crate::types::{RawExit, ResourceLimits};

const READ_CHUNK: usize = 8 * 1024;

/// How long readers may keep draining after the process group is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Where live output goes while a tool runs
#[derive(Debug, Clone)]
pub struct OutputSink {
    pub sender: mpsc::Sender<OutputChunk>,
    /// Stream label for the child's stdout
    pub stdout: OutputStream,
    /// Stream label for the child's stderr
    pub stderr: OutputStream,
}

/// Run a command and return its raw exit, whatever the exit status
#[instrument(skip(command), fields(program = command.program()))]
pub async fn run_captured(command: &ToolCommand) -> Result<RawExit, ToolError> {
    run(command, None, None).await
}

/// Run a command, forwarding output chunks as they arrive.
///
/// Bytes received on `input` are written to the child's stdin; stdin closes
/// when the sender side is dropped.
#[instrument(skip(command, sink, input), fields(program = command.program()))]
pub async fn run_streaming(
    command: &ToolCommand,
    sink: OutputSink,
    input: Option<mpsc::Receiver<Vec<u8>>>,
) -> Result<RawExit, ToolError> {
    run(command, Some(sink), input).await
}

/// Run a command that is expected to succeed.
///
/// A watchdog kill is [`ToolError::TimedOut`]. A non-zero exit is
/// [`ToolError::Failed`] unless the command opted into
/// [`allow_nonzero`](ToolCommand::allow_nonzero).
#[instrument(skip(command), fields(program = command.program()))]
pub async fn run_tool(command: &ToolCommand) -> Result<RawExit, ToolError> {
    let exit = run(command, None, None).await?;

    if exit.timed_out {
        return Err(ToolError::TimedOut {
            program: command.program().to_string(),
            seconds: command.get_timeout().as_secs_f64(),
        });
    }
    if !exit.success() && !command.allows_nonzero() {
        return Err(ToolError::Failed {
            program: command.program().to_string(),
            exit_code: exit.exit_code,
            signal: exit.signal,
            stderr: exit.stderr,
        });
    }

    Ok(exit)
}

async fn run(
    command: &ToolCommand,
    sink: Option<OutputSink>,
    input: Option<mpsc::Receiver<Vec<u8>>>,
) -> Result<RawExit, ToolError> {
    let program = command.program();
    let limits = command.get_limits().clone();
    let output_cap = limits.output_cap();
    let wants_stdin = command.get_stdin().is_some() || input.is_some();

    let mut cmd = command.to_command();
    cmd.stdin(if wants_stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0);

    // SAFETY: the hook runs between fork and exec and only calls setrlimit,
    // which is async-signal-safe and touches no shared state.
    unsafe {
        cmd.pre_exec(move || apply_limits(&limits));
    }

    debug!(args = ?command.get_args(), timeout = ?command.get_timeout(), "spawning");

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| spawn_error(program, source))?;
    let mut group = GroupGuard::new(Some(child.id()));
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io_error(program, io::Error::other("process id out of range")))?;
    // The leader is reaped here and never through `child`, so its rusage survives
    let mut waiter = tokio::task::spawn_blocking(move || reap(pid));

    let _stdin_task = match child.stdin.take() {
        Some(pipe) => {
            let mut pipe =
                ChildStdin::from_std(pipe).map_err(|source| io_error(program, source))?;
            match (command.get_stdin(), input) {
                (Some(data), _) => {
                    let data = data.to_vec();
                    Some(AbortOnDrop(tokio::spawn(async move {
                        if let Err(e) = pipe.write_all(&data).await {
                            debug!(error = %e, "stdin closed early");
                        }
                    })))
                }
                (None, Some(mut input)) => Some(AbortOnDrop(tokio::spawn(async move {
                    while let Some(bytes) = input.recv().await {
                        if pipe.write_all(&bytes).await.is_err() || pipe.flush().await.is_err() {
                            break;
                        }
                    }
                }))),
                (None, None) => None,
            }
        }
        None => None,
    };

    let stdout_forward = sink.as_ref().map(|s| (s.sender.clone(), s.stdout));
    let stderr_forward = sink.as_ref().map(|s| (s.sender.clone(), s.stderr));
    let mut stdout_task = match child.stdout.take() {
        Some(pipe) => {
            let pipe = ChildStdout::from_std(pipe).map_err(|source| io_error(program, source))?;
            Some(AbortOnDrop(tokio::spawn(capture(pipe, output_cap, stdout_forward))))
        }
        None => None,
    };
    let mut stderr_task = match child.stderr.take() {
        Some(pipe) => {
            let pipe = ChildStderr::from_std(pipe).map_err(|source| io_error(program, source))?;
            Some(AbortOnDrop(tokio::spawn(capture(pipe, output_cap, stderr_forward))))
        }
        None => None,
    };

    let timeout = command.get_timeout();
    let (reaped, timed_out) = match tokio::time::timeout(timeout, &mut waiter).await {
        Ok(joined) => (joined_reap(program, joined)?, false),
        Err(_) => {
            debug!(?timeout, "watchdog fired, killing process group");
            group.kill();
            (joined_reap(program, waiter.await)?, true)
        }
    };
    let elapsed = started.elapsed();

    // Sweep anything the leader left behind
    group.kill();

    let stdout = drain(stdout_task.as_mut()).await;
    let stderr = drain(stderr_task.as_mut()).await;

    let exit = RawExit {
        exit_code: reaped.status.code(),
        signal: reaped.status.signal(),
        timed_out,
        elapsed,
        truncated: stdout.truncated || stderr.truncated,
        stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
        peak_memory_kb: reaped.peak_memory_kb,
    };

    debug!(
        exit_code = ?exit.exit_code,
        signal = ?exit.signal,
        timed_out = exit.timed_out,
        elapsed_ms = exit.elapsed.as_millis() as u64,
        peak_memory_kb = ?exit.peak_memory_kb,
        truncated = exit.truncated,
        "process finished"
    );

    Ok(exit)
}

/// Exit status and peak memory of a reaped child
struct Reaped {
    status: ExitStatus,
    peak_memory_kb: Option<u64>,
}

/// Block until `pid` exits, then reap it along with its resource usage
fn reap(pid: libc::pid_t) -> io::Result<Reaped> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain integers, all-zero is a valid value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        // SAFETY: pid is our own child, not yet reaped, and both pointers are valid
        let result = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if result == pid {
            break;
        }
        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }

    Ok(Reaped {
        status: ExitStatus::from_raw(status),
        // kilobytes on Linux
        peak_memory_kb: u64::try_from(usage.ru_maxrss).ok(),
    })
}

fn joined_reap(
    program: &str,
    joined: Result<io::Result<Reaped>, JoinError>,
) -> Result<Reaped, ToolError> {
    joined
        .map_err(|e| io_error(program, io::Error::other(e)))?
        .map_err(|source| io_error(program, source))
}

/// Apply the resource envelope to the calling process
fn apply_limits(limits: &ResourceLimits) -> io::Result<()> {
    if let Some(seconds) = limits.time_limit {
        // SIGXCPU at the soft limit, SIGKILL one second later
        let soft = seconds.ceil().max(1.0) as u64;
        setrlimit(Resource::RLIMIT_CPU, soft, soft + 1)?;
    }
    if let Some(kb) = limits.memory_limit {
        let bytes = kb * 1024;
        setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        setrlimit(Resource::RLIMIT_DATA, bytes, bytes)?;
    }
    if let Some(kb) = limits.rss_limit {
        let bytes = kb * 1024;
        setrlimit(Resource::RLIMIT_RSS, bytes, bytes)?;
    }
    if let Some(kb) = limits.stack_limit {
        let bytes = kb * 1024;
        setrlimit(Resource::RLIMIT_STACK, bytes, bytes)?;
    }
    if let Some(files) = limits.max_open_files {
        setrlimit(Resource::RLIMIT_NOFILE, files.into(), files.into())?;
    }
    if let Some(procs) = limits.max_processes {
        setrlimit(Resource::RLIMIT_NPROC, procs.into(), procs.into())?;
    }
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    Ok(())
}

fn spawn_error(program: &str, source: io::Error) -> ToolError {
    if source.kind() == io::ErrorKind::NotFound {
        ToolError::NotFound {
            program: program.to_string(),
        }
    } else {
        ToolError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

fn io_error(program: &str, source: io::Error) -> ToolError {
    ToolError::Io {
        program: program.to_string(),
        source,
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to EOF, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn capture<R>(
    mut reader: R,
    cap: Option<usize>,
    forward: Option<(mpsc::Sender<OutputChunk>, OutputStream)>,
) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut captured = Captured::default();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "pipe read failed");
                break;
            }
        };

        let room = cap.map_or(n, |cap| cap.saturating_sub(captured.bytes.len()));
        let kept = &buf[..n.min(room)];
        if kept.len() < n {
            captured.truncated = true;
        }
        if kept.is_empty() {
            continue;
        }

        captured.bytes.extend_from_slice(kept);
        if let Some((ref sender, stream)) = forward {
            let chunk = OutputChunk {
                stream,
                data: String::from_utf8_lossy(kept).into_owned(),
            };
            // A closed receiver only means nobody is listening any more
            let _ = sender.send(chunk).await;
        }
    }

    captured
}

async fn drain(task: Option<&mut AbortOnDrop<Captured>>) -> Captured {
    let Some(task) = task else {
        return Captured::default();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut task.0).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader failed");
            Captured::default()
        }
        Err(_) => {
            warn!("output pipe still open after process group was killed");
            task.0.abort();
            Captured::default()
        }
    }
}

/// Kills a process group on demand and on drop
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "failed to kill process group"),
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Aborts a spawned helper task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
