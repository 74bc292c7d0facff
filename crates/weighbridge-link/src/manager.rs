// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Link manager: owns the device connection and runs two tasks.
//
//   read loop   open → read lines → parse → overwrite latest slot
//               on open failure: back off `base * n` (capped), retry
//               on read failure/EOF: drop the stream, reopen
//   push loop   every tick: take the latest slot, debounce, hand the
//               message to the push callback
//
// The loops share nothing but the single-slot `latest` watch channel and the
// shutdown signal.  Stopping flips the signal; the read loop drops its stream
// (closing the port) from inside the `select!` that is waiting on the read,
// so a blocked read never delays shutdown.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use weighbridge_core::config::{AppConfig, PushFormat};
use weighbridge_core::types::{LinkState, Reading};

use crate::backoff::{Backoff, BackoffConfig};
use crate::debounce::Debouncer;
use crate::frame::parse_frame;
use crate::transport::DeviceTransport;

/// Pause before reopening after a connection drops, so a device that opens
/// and immediately hits EOF cannot spin the read loop.
const REOPEN_PAUSE: Duration = Duration::from_millis(250);

/// Longest line accepted as a frame, terminator included.  Longer lines are
/// discarded up to the next newline.
pub const MAX_FRAME_BYTES: usize = 256;

/// Callback receiving each message the push loop emits.
pub type PushCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Tunables for one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub backoff: BackoffConfig,
    pub push_interval: Duration,
    pub debounce: bool,
    pub debounce_epsilon: f64,
    pub push_format: PushFormat,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl LinkConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            backoff: BackoffConfig {
                base: config.retry_interval(),
                max: config.max_retry_delay(),
            },
            push_interval: config.push_interval(),
            debounce: config.debounce,
            debounce_epsilon: config.debounce_epsilon,
            push_format: config.push_format,
        }
    }
}

/// The most recent accepted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Frame text as received, trimmed.
    pub raw: String,
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

impl Sample {
    fn message(&self, format: PushFormat) -> String {
        match format {
            PushFormat::Reading => self.reading.to_message(),
            PushFormat::Raw => self.raw.clone(),
        }
    }
}

/// Resilient connection to one measurement device.
pub struct LinkManager<T: DeviceTransport> {
    transport: Arc<T>,
    config: LinkConfig,
    shutdown: watch::Sender<bool>,
    latest: watch::Sender<Option<Sample>>,
    state: watch::Sender<LinkState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: DeviceTransport> LinkManager<T> {
    pub fn new(transport: T, config: LinkConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (latest, _) = watch::channel(None);
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            transport: Arc::new(transport),
            config,
            shutdown,
            latest,
            state,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current connection state as last published by the read loop.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// The latest accepted frame, if any has been read.
    pub fn latest(&self) -> Option<Sample> {
        self.latest.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.lock_tasks().is_empty()
    }

    /// Spawn the read and push loops and return immediately.
    ///
    /// Calling `start` on a running link does nothing.
    pub fn start<F>(&self, on_push: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut tasks = self.lock_tasks();
        if !tasks.is_empty() {
            debug!(device = %self.transport.describe(), "link already running");
            return;
        }
        self.shutdown.send_replace(false);

        let read = tokio::spawn(read_loop(
            Arc::clone(&self.transport),
            self.config.backoff,
            self.latest.clone(),
            self.state.clone(),
            self.shutdown.subscribe(),
        ));
        let push = tokio::spawn(push_loop(
            self.latest.subscribe(),
            self.config.clone(),
            Arc::new(on_push),
            self.shutdown.subscribe(),
        ));
        tasks.push(read);
        tasks.push(push);
        info!(device = %self.transport.describe(), "link started");
    }

    /// Signal both loops to stop, close the connection and wait for the
    /// loops to exit.  Safe to call repeatedly and before `start`.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.lock_tasks());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "link task ended abnormally");
            }
        }
        info!(device = %self.transport.describe(), "link stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: DeviceTransport> Drop for LinkManager<T> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

/// How a connected session ended.
enum SessionEnd {
    Cancelled,
    Disconnected(String),
}

async fn read_loop<T: DeviceTransport>(
    transport: Arc<T>,
    backoff: BackoffConfig,
    latest: watch::Sender<Option<Sample>>,
    state: watch::Sender<LinkState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let device = transport.describe();
    let mut backoff = Backoff::new(backoff);

    loop {
        if *shutdown.borrow() {
            break;
        }
        state.send_replace(LinkState::Opening);

        let opened = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            opened = transport.open() => opened,
        };

        match opened {
            Ok(stream) => {
                backoff.reset();
                state.send_replace(LinkState::Open);
                info!(device = %device, "device link open");

                match read_session(stream, &latest, &state, &mut shutdown).await {
                    SessionEnd::Cancelled => {
                        info!(device = %device, "closing device link");
                        break;
                    }
                    SessionEnd::Disconnected(reason) => {
                        state.send_replace(LinkState::Closed);
                        warn!(device = %device, reason = %reason, "device link lost, reopening");
                        tokio::select! {
                            _ = shutdown.wait_for(|stop| *stop) => break,
                            _ = tokio::time::sleep(REOPEN_PAUSE) => {}
                        }
                    }
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                state.send_replace(LinkState::Retrying(backoff.attempt()));
                warn!(
                    device = %device,
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "device open failed"
                );
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    state.send_replace(LinkState::Closed);
    debug!(device = %device, "read loop exited");
}

/// Outcome of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// `buf` holds a complete line (or the tail of the stream).
    Line,
    /// The line ran past the limit and was dropped.
    Oversized,
    Eof,
}

/// Read up to and including the next `\n` into `buf`, keeping at most `max`
/// bytes.  An overlong line is consumed but not kept, so memory stays bounded
/// however long the device goes without a terminator.
async fn read_bounded_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<LineRead> {
    let mut overflow = false;
    loop {
        let (used, complete) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(match (overflow, buf.is_empty()) {
                    (true, _) => LineRead::Oversized,
                    (false, true) => LineRead::Eof,
                    (false, false) => LineRead::Line,
                });
            }
            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };
            if !overflow {
                if buf.len() + chunk.len() > max {
                    overflow = true;
                    buf.clear();
                } else {
                    buf.extend_from_slice(chunk);
                }
            }
            (chunk.len(), complete)
        };
        reader.consume(used);
        if complete {
            return Ok(if overflow { LineRead::Oversized } else { LineRead::Line });
        }
    }
}

/// Read lines until the stream fails or shutdown is signalled.  The stream
/// is dropped (closed) on return.
async fn read_session<S: AsyncRead + Unpin>(
    stream: S,
    latest: &watch::Sender<Option<Sample>>,
    state: &watch::Sender<LinkState>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(64);
    state.send_replace(LinkState::Reading);

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return SessionEnd::Cancelled,
            read = read_bounded_line(&mut reader, &mut buf, MAX_FRAME_BYTES) => read,
        };
        match read {
            Ok(LineRead::Line) => {}
            Ok(LineRead::Oversized) => {
                debug!(limit = MAX_FRAME_BYTES, "oversized frame discarded");
                continue;
            }
            Ok(LineRead::Eof) => return SessionEnd::Disconnected("end of stream".into()),
            Err(e) => return SessionEnd::Disconnected(e.to_string()),
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        trace!(frame = line, "frame received");

        match parse_frame(line) {
            Ok(reading) => {
                latest.send_replace(Some(Sample {
                    raw: line.to_owned(),
                    reading,
                    received_at: Utc::now(),
                }));
            }
            Err(rejection) => debug!(frame = line, reason = %rejection, "frame rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Push loop
// ---------------------------------------------------------------------------

async fn push_loop(
    latest: watch::Receiver<Option<Sample>>,
    config: LinkConfig,
    on_push: PushCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut debouncer = Debouncer::new(config.debounce_epsilon);
    info!(
        interval_ms = config.push_interval.as_millis() as u64,
        debounce = config.debounce,
        "push loop started"
    );

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }

        let Some(sample) = latest.borrow().clone() else {
            continue;
        };
        if config.debounce && !debouncer.should_deliver(&sample.reading) {
            continue;
        }
        let message = sample.message(config.push_format);
        trace!(message = %message, "pushing reading");
        on_push(message);
    }

    debug!("push loop exited");
}
