//! Event stream subscription and keep-alive liveness.
//!
//! One task owns the subscription, the liveness clock and the lagging flag,
//! so frame handling and the periodic check never race. Dropped streams are
//! reopened with backoff for as long as the server still knows the client.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use retro_core::{FrameStream, InboundMessage, SessionError, StreamFrame, Transport};
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::stats::SessionCounters;

/// Receives everything the monitor observes, on the monitor's task.
pub trait StreamObserver: Send + Sync {
    /// A subscription opened (first open or reconnect).
    fn opened(&self);
    /// Liveness crossed the keep-alive threshold in either direction.
    fn lagging(&self, lagging: bool);
    /// A non-keep-alive frame, in stream order.
    fn message(&self, message: &InboundMessage);
    /// Resubscribing was rejected because the server no longer knows the
    /// client. The monitor stops after this call.
    fn session_unknown(&self);
}

/// Handle to a running monitor task. Dropping it stops the task.
pub struct EventMonitor {
    cancel: CancellationToken,
}

impl EventMonitor {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        events_url: String,
        config: &SessionConfig,
        counters: Arc<SessionCounters>,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = MonitorTask {
            transport,
            events_url,
            backoff: config.backoff,
            threshold: config.keep_alive_threshold,
            counters,
            observer,
            last_keep_alive_at: Instant::now(),
            lagging: false,
            attempt: 0,
            connected_once: false,
        };
        let _ = tokio::spawn(task.run(cancel.clone(), config.monitor_interval));
        Self { cancel }
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Phase {
    Connecting(BoxFuture<'static, Result<FrameStream, SessionError>>),
    Waiting(std::pin::Pin<Box<Sleep>>),
    Streaming(FrameStream),
}

enum Step {
    Opened(FrameStream),
    ConnectFailed(SessionError),
    RetryNow,
    Frame(StreamFrame),
    FrameError(SessionError),
    Closed,
}

async fn advance(phase: &mut Phase) -> Step {
    match phase {
        Phase::Connecting(connect) => match connect.await {
            Ok(stream) => Step::Opened(stream),
            Err(e) => Step::ConnectFailed(e),
        },
        Phase::Waiting(sleep) => {
            sleep.as_mut().await;
            Step::RetryNow
        }
        Phase::Streaming(stream) => match stream.next().await {
            Some(Ok(frame)) => Step::Frame(frame),
            Some(Err(e)) => Step::FrameError(e),
            None => Step::Closed,
        },
    }
}

struct MonitorTask {
    transport: Arc<dyn Transport>,
    events_url: String,
    backoff: Backoff,
    threshold: Duration,
    counters: Arc<SessionCounters>,
    observer: Arc<dyn StreamObserver>,
    last_keep_alive_at: Instant,
    lagging: bool,
    /// Consecutive failed or frameless subscriptions.
    attempt: u32,
    connected_once: bool,
}

impl MonitorTask {
    async fn run(mut self, cancel: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut phase = self.connect();

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(events_url = %self.events_url, "event monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_liveness();
                    continue;
                }
                step = advance(&mut phase) => step,
            };

            match step {
                Step::Opened(stream) => {
                    self.counters.record_stream_open(self.connected_once);
                    self.connected_once = true;
                    self.last_keep_alive_at = Instant::now();
                    info!(events_url = %self.events_url, "event stream connected");
                    self.observer.opened();
                    phase = Phase::Streaming(stream);
                }
                Step::ConnectFailed(e) if e.is_session_unknown() => {
                    warn!(events_url = %self.events_url, "event stream rejected, session unknown");
                    self.observer.session_unknown();
                    return;
                }
                Step::ConnectFailed(e) => phase = self.wait(&e),
                Step::RetryNow => phase = self.connect(),
                Step::Frame(frame) => {
                    self.attempt = 0;
                    self.handle_frame(frame);
                }
                Step::FrameError(e @ SessionError::Decode(_)) => {
                    warn!(error = %e, "skipping undecodable stream frame");
                }
                Step::FrameError(e) => phase = self.wait(&e),
                Step::Closed => {
                    phase = self.wait(&SessionError::StreamInterrupted("stream closed".into()));
                }
            }
        }
    }

    fn connect(&self) -> Phase {
        let transport = self.transport.clone();
        let url = self.events_url.clone();
        Phase::Connecting(Box::pin(async move { transport.subscribe(&url).await }))
    }

    fn wait(&mut self, error: &SessionError) -> Phase {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.backoff.delay(self.attempt);
        warn!(
            events_url = %self.events_url,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error_kind = error.error_kind(),
            error = %error,
            "event stream down, resubscribing"
        );
        Phase::Waiting(Box::pin(tokio::time::sleep(delay)))
    }

    fn handle_frame(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::KeepAlive => {
                trace!("keep-alive");
                self.last_keep_alive_at = Instant::now();
            }
            StreamFrame::Message(message) => self.observer.message(&message),
        }
    }

    fn check_liveness(&mut self) {
        let silent_for = self.last_keep_alive_at.elapsed();
        let lagging = silent_for > self.threshold;
        if lagging == self.lagging {
            return;
        }
        self.lagging = lagging;
        if lagging {
            warn!(
                events_url = %self.events_url,
                silent_ms = silent_for.as_millis() as u64,
                "event stream lagging"
            );
        } else {
            info!(events_url = %self.events_url, "event stream live again");
        }
        self.observer.lagging(lagging);
    }
}
