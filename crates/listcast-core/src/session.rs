//! Per-connection push session
//!
//! A session sends an initial snapshot, then re-sends whenever the source
//! reports a change. Three event sources feed one dispatch loop:
//! - change events from the [`Watcher`](crate::feed::Watcher)
//! - the optional rate-limit clock (client-requested period)
//! - the keepalive clock (ping, plus a forced resend when the stream is quiet)
//!
//! The dispatch loop is the only writer. A separate reader task drains
//! inbound frames and cancels the disconnect token when the client goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::feed::{ChangeEvents, ListSource, Snapshot, SourceError};
use crate::period;
use crate::protocol::{KEEPALIVE_INTERVAL, WRITE_TIMEOUT};
use crate::transport::{FrameSink, FrameSource, Inbound, TransportError};

/// Errors that end a session
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Listing or encoding the snapshot failed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Writing to the connection failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A write did not complete before its deadline
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Timing parameters for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Minimum spacing of change-triggered sends; zero disables rate limiting
    pub period: Duration,
    /// Ping cadence
    pub keepalive_interval: Duration,
    /// Deadline for every outbound write
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            keepalive_interval: KEEPALIVE_INTERVAL,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Same config with a client-requested period, capped to the maximum
    pub fn with_period(self, period: Duration) -> Self {
        Self {
            period: period::clamp(period),
            ..self
        }
    }
}

/// Source of session identifiers, one per process
#[derive(Debug, Default)]
pub struct SessionIds {
    next: AtomicU64,
}

impl SessionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier (starting at 1)
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// What a call to the write policy put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    /// A real snapshot, now remembered as the last one sent
    Snapshot,
    /// The sentinel, because the fresh snapshot equals the last one sent
    Sentinel,
}

/// One client's streaming session
pub struct Session<S: ListSource, W: FrameSink> {
    id: u64,
    source: Arc<S>,
    sink: W,
    config: SessionConfig,
    last: Option<S::Snapshot>,
}

impl<S: ListSource, W: FrameSink> Session<S, W> {
    /// Create a session writing to `sink` and listing from `source`
    pub fn new(id: u64, source: Arc<S>, sink: W, config: SessionConfig) -> Self {
        Self {
            id,
            source,
            sink,
            config,
            last: None,
        }
    }

    /// Run the session until the client disconnects or an error occurs
    ///
    /// A client disconnect returns `Ok(())`. Listing, encoding, and write
    /// failures end the session with an error; nothing is retried.
    pub async fn run<R: FrameSource>(
        mut self,
        frames: R,
        mut events: ChangeEvents,
    ) -> Result<(), StreamError> {
        debug!(id = self.id, period = ?self.config.period, "stream open");

        let disconnect = CancellationToken::new();
        let reader = spawn_reader(frames, disconnect.clone());

        let result = self.dispatch(&mut events, &disconnect).await;

        // Release the read half so the connection can be torn down.
        reader.abort();
        debug!(id = self.id, ok = result.is_ok(), "stream closed");
        result
    }

    async fn dispatch(
        &mut self,
        events: &mut ChangeEvents,
        disconnect: &CancellationToken,
    ) -> Result<(), StreamError> {
        self.write_list(false).await?;

        let mut rate_limit = (!self.config.period.is_zero()).then(|| clock(self.config.period));
        let mut keepalive = clock(self.config.keepalive_interval);
        let mut recent_write = false;

        loop {
            if let Some(rate_limit) = rate_limit.as_mut() {
                tokio::select! {
                    biased;
                    _ = disconnect.cancelled() => return Ok(()),
                    _ = rate_limit.tick() => {}
                }
            }

            tokio::select! {
                biased;
                _ = disconnect.cancelled() => return Ok(()),
                _ = keepalive.tick() => {
                    self.ping().await?;
                    if !recent_write {
                        self.write_list(true).await?;
                    }
                    recent_write = !recent_write;
                }
                _ = events.next() => {
                    self.write_list(false).await?;
                    recent_write = true;
                    if let Some(rate_limit) = rate_limit.as_mut() {
                        rate_limit.reset();
                    }
                }
            }
        }
    }

    /// Fetch the current state and send it according to the write policy
    ///
    /// With `force` the last snapshot is ignored and the fresh one is always
    /// sent in full. Otherwise a snapshot equal to the last one sent is
    /// replaced by the sentinel and the last snapshot is kept as is. On any
    /// error the last snapshot is left untouched.
    async fn write_list(&mut self, force: bool) -> Result<Sent, StreamError> {
        let fresh = self.source.list().await?;

        let repeat = !force && self.last.as_ref() == Some(&fresh);
        let payload = if repeat {
            self.source.encode(&<S::Snapshot as Snapshot>::sentinel())?
        } else {
            self.source.encode(&fresh)?
        };

        self.write(payload).await?;

        if repeat {
            trace!(id = self.id, "sent sentinel");
            Ok(Sent::Sentinel)
        } else {
            trace!(id = self.id, force, "sent snapshot");
            self.last = Some(fresh);
            Ok(Sent::Snapshot)
        }
    }

    async fn write(&mut self, payload: String) -> Result<(), StreamError> {
        let deadline = self.config.write_timeout;
        match time::timeout(deadline, self.sink.send_text(payload)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StreamError::WriteTimeout(deadline)),
        }
    }

    async fn ping(&mut self) -> Result<(), StreamError> {
        let deadline = self.config.write_timeout;
        match time::timeout(deadline, self.sink.send_ping()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StreamError::WriteTimeout(deadline)),
        }
    }
}

/// Periodic clock whose first tick is one period from now
fn clock(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Drain inbound frames until the client goes away, then cancel `disconnect`
///
/// The application protocol is send-only, so frame contents are discarded.
pub fn spawn_reader<R: FrameSource>(mut frames: R, disconnect: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Some(Ok(Inbound::Frame)) => {}
                Some(Ok(Inbound::Close)) | None => {
                    debug!("client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "read error");
                    break;
                }
            }
        }
        disconnect.cancel();
    })
}
