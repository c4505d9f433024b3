//! Per-connection supervisor
//!
//! One task per session. It owns the session state, at most one in-flight
//! job task, the heartbeat clock and the idle clock. The transport feeds it
//! [`Inbound`] events and drains [`ServerMessage`]s from a channel, so the
//! loop knows nothing about WebSockets.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::job::{Job, JobId, JobRequest};
use crate::report::Report;
use crate::runner::{JobContext, JobError, Runner, report_status};
use crate::session::protocol::{ClientMessage, ServerMessage};
use crate::session::{SessionEvent, SessionId, SessionRegistry, SessionState};
use crate::toolchain::OutputChunk;

const OUTPUT_BUFFER: usize = 64;
const INPUT_BUFFER: usize = 16;

/// Event delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame
    Text(String),
    /// A transport-level pong
    Pong,
    /// The client closed the connection
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    HeartbeatTimeout,
    IdleTimeout,
    /// The client stopped draining messages for a whole heartbeat grace window
    Stalled,
    /// The outbound channel is gone
    TransportGone,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::ClientClosed => "client closed the connection",
            CloseReason::HeartbeatTimeout => "heartbeat timeout",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::Stalled => "client stopped reading",
            CloseReason::TransportGone => "transport closed",
        };
        f.write_str(reason)
    }
}

/// Something that can run a job to completion
pub trait JobExecutor: Clone + Send + Sync + 'static {
    fn execute(
        &self,
        job: Job,
        ctx: JobContext,
    ) -> impl Future<Output = Result<Report, JobError>> + Send;
}

impl JobExecutor for Runner {
    async fn execute(&self, job: Job, ctx: JobContext) -> Result<Report, JobError> {
        self.run_job(&job, ctx).await
    }
}

/// A client session waiting to be driven
pub struct Session<E> {
    id: SessionId,
    executor: E,
    config: SessionConfig,
    registry: Option<SessionRegistry>,
}

impl<E: JobExecutor> Session<E> {
    pub fn new(executor: E, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            executor,
            config,
            registry: None,
        }
    }

    /// Publish this session's state in `registry` while it runs
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the session until it closes.
    ///
    /// On return the in-flight job, if any, has been aborted and awaited, so
    /// its processes are dead and its workspace is gone.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> CloseReason {
        if let Some(ref registry) = self.registry {
            registry.register(self.id).await;
        }

        let now = Instant::now();
        let mut driver = Driver {
            id: self.id,
            executor: self.executor,
            registry: self.registry,
            outbound,
            send_timeout: self.config.heartbeat_grace(),
            state: SessionState::Connecting,
            running: None,
            pong_deadline: None,
            last_seen: now,
        };

        let reason = driver.serve(&self.config, &mut inbound).await;
        driver.close(reason).await;
        reason
    }
}

struct RunningJob {
    id: JobId,
    handle: JoinHandle<Result<Report, JobError>>,
    output: mpsc::Receiver<OutputChunk>,
    input: Option<mpsc::Sender<Vec<u8>>>,
}

enum JobEvent {
    Output(OutputChunk),
    Finished(Result<Result<Report, JobError>, JoinError>),
}

impl RunningJob {
    async fn next_event(&mut self) -> JobEvent {
        tokio::select! {
            biased;
            Some(chunk) = self.output.recv() => JobEvent::Output(chunk),
            result = &mut self.handle => JobEvent::Finished(result),
        }
    }

    /// Abort the job task and wait until it has been dropped
    async fn cancel(self) {
        self.handle.abort();
        match self.handle.await {
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(job = %self.id, error = %e, "job task failed while cancelling"),
            Ok(_) => debug!(job = %self.id, "job finished before it could be cancelled"),
        }
    }
}

async fn next_job_event(running: &mut Option<RunningJob>) -> JobEvent {
    match running {
        Some(job) => job.next_event().await,
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct Driver<E> {
    id: SessionId,
    executor: E,
    registry: Option<SessionRegistry>,
    outbound: mpsc::Sender<ServerMessage>,
    /// How long one outbound message may wait for room in the channel
    send_timeout: Duration,
    state: SessionState,
    running: Option<RunningJob>,
    /// Set while a server ping is unanswered
    pong_deadline: Option<Instant>,
    last_seen: Instant,
}

impl<E: JobExecutor> Driver<E> {
    /// Queue a message for the transport.
    ///
    /// A client that leaves the channel full for longer than the heartbeat
    /// grace is treated like one that stopped answering pings.
    async fn send(&self, message: ServerMessage) -> Result<(), CloseReason> {
        match tokio::time::timeout(self.send_timeout, self.outbound.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CloseReason::TransportGone),
            Err(_) => {
                warn!(timeout = ?self.send_timeout, "outbound channel stayed full");
                Err(CloseReason::Stalled)
            }
        }
    }

    async fn advance(&mut self, event: SessionEvent) {
        match self.state.transition(event) {
            Ok(next) => {
                debug!(from = ?self.state, to = ?next, "session state changed");
                self.state = next;
                if let Some(ref registry) = self.registry {
                    registry.set_state(self.id, next).await;
                }
            }
            Err(e) => warn!(error = %e, "ignored session event"),
        }
    }

    async fn serve(
        &mut self,
        config: &SessionConfig,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> CloseReason {
        if let Err(reason) = self
            .send(ServerMessage::Connected {
                session_id: self.id,
            })
            .await
        {
            return reason;
        }
        self.advance(SessionEvent::Opened).await;
        info!("session opened");

        let period = config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let idle_deadline = self.last_seen + config.idle_timeout();
            let step = tokio::select! {
                message = inbound.recv() => match message {
                    Some(Inbound::Text(text)) => {
                        self.last_seen = Instant::now();
                        self.on_text(&text).await
                    }
                    Some(Inbound::Pong) => {
                        self.last_seen = Instant::now();
                        self.pong_deadline = None;
                        Ok(())
                    }
                    Some(Inbound::Closed) | None => Err(CloseReason::ClientClosed),
                },
                _ = heartbeat.tick() => {
                    if self.pong_deadline.is_none() {
                        self.pong_deadline = Some(Instant::now() + config.heartbeat_grace());
                        self.send(ServerMessage::Ping).await
                    } else {
                        Ok(())
                    }
                }
                _ = deadline(self.pong_deadline) => Err(CloseReason::HeartbeatTimeout),
                _ = sleep_until(idle_deadline) => Err(CloseReason::IdleTimeout),
                event = next_job_event(&mut self.running) => self.on_job_event(event).await,
            };

            if let Err(reason) = step {
                return reason;
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Result<(), CloseReason> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "malformed client message");
                return self
                    .send(ServerMessage::error(format!("invalid message: {e}")))
                    .await;
            }
        };

        match message {
            ClientMessage::Job(request) => self.start_job(request).await,
            ClientMessage::Input { data } => self.forward_input(data).await,
            ClientMessage::Cancel => self.cancel_job().await,
            ClientMessage::Ping => self.send(ServerMessage::Pong).await,
            ClientMessage::Pong => {
                self.pong_deadline = None;
                Ok(())
            }
        }
    }

    async fn start_job(&mut self, request: JobRequest) -> Result<(), CloseReason> {
        if self.state == SessionState::Busy {
            debug!("job refused, session busy");
            let busy = JobError::Busy;
            return self
                .send(ServerMessage::error_kind(busy.kind(), busy.to_string()))
                .await;
        }

        let job = match Job::from_request(request) {
            Ok(job) => job,
            Err(rejection) => {
                let error = JobError::from(rejection);
                return self
                    .send(ServerMessage::error_kind(error.kind(), error.to_string()))
                    .await;
            }
        };

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (input_tx, input_rx) = if job.action().is_interactive() {
            let (tx, rx) = mpsc::channel(INPUT_BUFFER);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let ctx = JobContext::streaming(output_tx, input_rx);

        let job_id = job.id();
        let action = job.action();
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(job, ctx).await });

        self.running = Some(RunningJob {
            id: job_id,
            handle,
            output: output_rx,
            input: input_tx,
        });
        self.advance(SessionEvent::JobStarted).await;
        info!(job = %job_id, %action, "job started");

        self.send(ServerMessage::Started {
            session_id: self.id,
            job_id,
            action,
        })
        .await
    }

    async fn forward_input(&self, data: String) -> Result<(), CloseReason> {
        let Some(input) = self.running.as_ref().and_then(|job| job.input.as_ref()) else {
            return self
                .send(ServerMessage::error("no interactive job is running"))
                .await;
        };

        match input.try_send(data.into_bytes()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.send(ServerMessage::error("input buffer is full")).await
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("job no longer reads input");
                Ok(())
            }
        }
    }

    async fn cancel_job(&mut self) -> Result<(), CloseReason> {
        let Some(job) = self.running.take() else {
            return self.send(ServerMessage::error("no job to cancel")).await;
        };

        let job_id = job.id;
        job.cancel().await;
        self.advance(SessionEvent::JobFinished).await;
        info!(job = %job_id, "job cancelled");

        self.send(ServerMessage::Cancelled {
            session_id: self.id,
            job_id,
        })
        .await
    }

    fn output_message(&self, job_id: JobId, chunk: OutputChunk) -> ServerMessage {
        ServerMessage::Output {
            session_id: self.id,
            job_id,
            stream: chunk.stream,
            data: chunk.data,
        }
    }

    async fn on_job_event(&mut self, event: JobEvent) -> Result<(), CloseReason> {
        let result = match event {
            JobEvent::Output(chunk) => {
                let Some(job_id) = self.running.as_ref().map(|job| job.id) else {
                    return Ok(());
                };
                return self.send(self.output_message(job_id, chunk)).await;
            }
            JobEvent::Finished(result) => result,
        };

        let Some(mut job) = self.running.take() else {
            return Ok(());
        };
        while let Ok(chunk) = job.output.try_recv() {
            self.send(self.output_message(job.id, chunk)).await?;
        }
        self.advance(SessionEvent::JobFinished).await;

        let message = match result {
            Ok(Ok(report)) => ServerMessage::Result {
                session_id: self.id,
                job_id: job.id,
                status: report_status(&report),
                report,
            },
            Ok(Err(error)) => ServerMessage::failed(self.id, job.id, error),
            Err(e) => {
                warn!(job = %job.id, error = %e, "job task panicked");
                ServerMessage::failed(
                    self.id,
                    job.id,
                    JobError::Internal("job task panicked".to_string()),
                )
            }
        };
        self.send(message).await
    }

    async fn close(&mut self, reason: CloseReason) {
        self.advance(SessionEvent::CloseRequested).await;

        if let Some(job) = self.running.take() {
            debug!(job = %job.id, "cancelling in-flight job");
            job.cancel().await;
        }

        if reason != CloseReason::TransportGone {
            // the writer may be stuck on a dead peer, so never wait here
            let _ = self.outbound.try_send(ServerMessage::Closing {
                reason: reason.to_string(),
            });
        }

        self.advance(SessionEvent::Closed).await;
        if let Some(ref registry) = self.registry {
            registry.remove(self.id).await;
        }
        info!(%reason, "session closed");
    }
}
