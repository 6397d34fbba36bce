//! Ordered command delivery.
//!
//! A [`CommandChannel`] is a FIFO queue drained by a single worker task, so
//! at most one wire call is outstanding per channel and commands reach the
//! server in submission order. The worker does nothing until the channel is
//! opened, which lets callers queue commands before the handshake completes.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use retro_core::{Command, Credentials, SessionError, Transport};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::stats::SessionCounters;

/// Called once by the worker when the server reports the session unknown.
pub type SessionLossHook = Arc<dyn Fn() + Send + Sync>;

type Reply = oneshot::Sender<Result<Value, SessionError>>;

struct QueuedCommand {
    payload: Value,
    reply: Reply,
}

/// Handle to one command queue. Clones share the queue; the worker stops
/// when the last handle is dropped, abandoning whatever is still queued.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    queue: mpsc::UnboundedSender<QueuedCommand>,
    gate: Mutex<Option<oneshot::Sender<()>>>,
    cancel: CancellationToken,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CommandChannel {
    /// Create a gated channel and spawn its worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        backoff: Backoff,
        counters: Arc<SessionCounters>,
        on_session_unknown: SessionLossHook,
    ) -> Self {
        let (queue, commands) = mpsc::unbounded_channel();
        let (gate, opened) = oneshot::channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            transport,
            credentials,
            backoff,
            counters,
            on_session_unknown,
            cancel: cancel.clone(),
        };
        let _ = tokio::spawn(worker.run(commands, opened));

        Self {
            inner: Arc::new(ChannelInner {
                queue,
                gate: Mutex::new(Some(gate)),
                cancel,
            }),
        }
    }

    /// Release the gate. Queued commands start flowing; repeated calls are
    /// no-ops.
    pub fn open(&self) {
        if let Some(gate) = self.inner.gate.lock().take() {
            let _ = gate.send(());
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.gate.lock().is_none()
    }

    /// Queue `payload` behind every earlier submission.
    ///
    /// The returned future resolves with the server's result or a surfaced
    /// error. If the channel is discarded first (session loss), the command
    /// is abandoned and the future never resolves.
    pub fn submit(
        &self,
        payload: Value,
    ) -> impl Future<Output = Result<Value, SessionError>> + Send + 'static {
        let (reply, result) = oneshot::channel();
        if self.inner.queue.send(QueuedCommand { payload, reply }).is_err() {
            debug!("command queue closed, command abandoned");
        }
        async move {
            match result.await {
                Ok(result) => result,
                Err(_) => std::future::pending().await,
            }
        }
    }
}

enum Delivery {
    Done(Result<Value, SessionError>),
    SessionUnknown,
    Cancelled,
}

struct Worker {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    backoff: Backoff,
    counters: Arc<SessionCounters>,
    on_session_unknown: SessionLossHook,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<QueuedCommand>,
        opened: oneshot::Receiver<()>,
    ) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = opened => {
                if result.is_err() {
                    return;
                }
            }
        }
        debug!(client_id = self.credentials.client_id(), "command channel open");

        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                next = commands.recv() => match next {
                    Some(command) => command,
                    None => return,
                },
            };

            match self.deliver(command.payload).await {
                Delivery::Done(result) => {
                    let _ = command.reply.send(result);
                }
                Delivery::SessionUnknown => {
                    warn!(
                        client_id = self.credentials.client_id(),
                        "server no longer knows this client, abandoning queued commands"
                    );
                    (self.on_session_unknown)();
                    return;
                }
                Delivery::Cancelled => return,
            }
        }
    }

    async fn deliver(&self, payload: Value) -> Delivery {
        let command = Command::Data(payload);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Delivery::Cancelled;
            }

            let result = self.transport.send(&self.credentials, &command).await;

            // The wire call itself is never aborted, but a reset channel
            // must not report into a newer session.
            if self.cancel.is_cancelled() {
                return Delivery::Cancelled;
            }

            match result {
                Ok(value) => {
                    self.counters.record_delivery();
                    return Delivery::Done(Ok(value));
                }
                Err(e) if e.is_session_unknown() => return Delivery::SessionUnknown,
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.backoff.delay(attempt);
                    self.counters.record_retry();
                    warn!(
                        client_id = self.credentials.client_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "command delivery failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Delivery::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        client_id = self.credentials.client_id(),
                        error_kind = e.error_kind(),
                        error = %e,
                        "command rejected"
                    );
                    return Delivery::Done(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport, TransportEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        transport: Arc<MockTransport>,
        counters: Arc<SessionCounters>,
        losses: Arc<AtomicUsize>,
        channel: CommandChannel,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let counters = Arc::new(SessionCounters::default());
        let losses = Arc::new(AtomicUsize::new(0));
        let hook_losses = losses.clone();
        let channel = CommandChannel::new(
            transport.clone(),
            Credentials::new("client-1", "s3cret").unwrap(),
            Backoff::default(),
            counters.clone(),
            Arc::new(move || {
                let _ = hook_losses.fetch_add(1, Ordering::SeqCst);
            }),
        );
        Fixture {
            transport,
            counters,
            losses,
            channel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_submission_order_one_at_a_time() {
        let f = fixture();
        f.transport
            .push_data(MockReply::after(Duration::from_millis(300), MockReply::Ok(json!(1))));
        f.transport
            .push_data(MockReply::after(Duration::from_millis(10), MockReply::Ok(json!(2))));
        f.transport.push_data(MockReply::Ok(json!(3)));
        f.channel.open();

        let a = f.channel.submit(json!("a"));
        let b = f.channel.submit(json!("b"));
        let c = f.channel.submit(json!("c"));
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!(a.unwrap(), json!(1));
        assert_eq!(b.unwrap(), json!(2));
        assert_eq!(c.unwrap(), json!(3));
        assert_eq!(f.transport.data_payloads(), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(f.transport.max_in_flight(), 1);
        assert_eq!(f.counters.snapshot().commands_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_before_open() {
        let f = fixture();
        let pending = f.channel.submit(json!({"early": true}));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.transport.data_payloads().is_empty());
        assert!(!f.channel.is_open());

        f.channel.open();
        assert!(f.channel.is_open());
        assert_eq!(pending.await.unwrap(), json!({}));
        assert_eq!(f.transport.data_payloads(), vec![json!({"early": true})]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let f = fixture();
        f.transport.push_data(MockReply::server_error(503));
        f.transport
            .push_data(MockReply::Error(SessionError::Network("reset".into())));
        f.transport.push_data(MockReply::Ok(json!("done")));
        f.channel.open();

        let started = tokio::time::Instant::now();
        let result = f.channel.submit(json!("retry me")).await;

        assert_eq!(result.unwrap(), json!("done"));
        // 500 ms + 1 s of backoff between the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(f.transport.data_payloads().len(), 3);
        assert_eq!(f.counters.snapshot().command_retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_response_fails_only_that_command() {
        let f = fixture();
        f.transport.push_data(MockReply::Error(SessionError::Unexpected {
            command: "data".into(),
            status: 400,
            body: "Invalid payload\n".into(),
        }));
        f.transport.push_data(MockReply::Ok(json!("next")));
        f.channel.open();

        let first = f.channel.submit(json!(1));
        let second = f.channel.submit(json!(2));

        let err = first.await.unwrap_err();
        assert!(matches!(err, SessionError::Unexpected { status: 400, .. }));
        assert_eq!(second.await.unwrap(), json!("next"));
        assert_eq!(f.transport.data_payloads().len(), 2);
        assert_eq!(f.losses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_unknown_abandons_the_queue() {
        let f = fixture();
        f.transport.push_data(MockReply::unknown_client());
        f.channel.open();

        let doomed = f.channel.submit(json!("a"));
        let queued = f.channel.submit(json!("b"));

        let outcome = tokio::time::timeout(Duration::from_secs(60), doomed).await;
        assert!(outcome.is_err(), "abandoned command must never resolve");
        let outcome = tokio::time::timeout(Duration::from_secs(60), queued).await;
        assert!(outcome.is_err());

        assert_eq!(f.losses.load(Ordering::SeqCst), 1);
        assert_eq!(f.transport.data_payloads(), vec![json!("a")]);

        // The worker is gone; later submissions are abandoned too.
        let late = f.channel.submit(json!("c"));
        assert!(tokio::time::timeout(Duration::from_secs(60), late).await.is_err());
        assert_eq!(f.transport.data_payloads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_channel_stops_retries() {
        let f = fixture();
        for _ in 0..10 {
            f.transport.push_data(MockReply::server_error(502));
        }
        f.channel.open();

        let command = f.channel.submit(json!("x"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(f.channel);
        assert!(tokio::time::timeout(Duration::from_secs(120), command).await.is_err());

        // Exactly the attempt made before the drop.
        let sent = f
            .transport
            .events()
            .into_iter()
            .filter(|event| matches!(event, TransportEvent::Received(Command::Data(_))))
            .count();
        assert_eq!(sent, 1);
    }
}
