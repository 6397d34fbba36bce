//! Scripted [`Transport`] for tests and demos.
//!
//! Replies are queued per command name and consumed in order; when a script
//! runs dry a default success is returned. Subscriptions are scripted the
//! same way and fed through a [`MockStreamHandle`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use retro_core::{Command, Credentials, FrameStream, SessionError, StreamFrame, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Events URL returned by the default hello reply.
pub const MOCK_EVENTS_URL: &str = "/events/mock";

/// Pre-programmed outcome of one `send` call.
#[derive(Debug)]
pub enum MockReply {
    Ok(Value),
    Error(SessionError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn after(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    /// The server's "Unknown client" rejection.
    pub fn unknown_client() -> Self {
        Self::Error(SessionError::SessionUnknown)
    }

    pub fn server_error(status: u16) -> Self {
        Self::Error(SessionError::Server {
            status,
            body: "Internal Server Error\n".into(),
        })
    }

    pub fn hello(events_url: &str) -> Self {
        Self::Ok(json!({ "eventsUrl": events_url }))
    }
}

/// What the mock observed, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Received(Command),
    Completed(Command),
}

type FrameSender = mpsc::UnboundedSender<Result<StreamFrame, SessionError>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<StreamFrame, SessionError>>;

enum MockSubscription {
    Stream(FrameReceiver),
    Error(SessionError),
}

/// Feeds frames into one scripted subscription. Dropping the handle (or
/// calling [`close`](Self::close)) ends the stream.
pub struct MockStreamHandle {
    frames: FrameSender,
}

impl MockStreamHandle {
    /// Returns `false` once the subscriber has dropped the stream.
    pub fn send(&self, frame: StreamFrame) -> bool {
        self.frames.send(Ok(frame)).is_ok()
    }

    pub fn keep_alive(&self) -> bool {
        self.send(StreamFrame::KeepAlive)
    }

    pub fn message(&self, event: &str, payload: Value) -> bool {
        self.send(StreamFrame::message(event, payload))
    }

    /// Yield an error item, as a broken connection would.
    pub fn fail(&self, error: SessionError) -> bool {
        self.frames.send(Err(error)).is_ok()
    }

    pub fn close(self) {}

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

pub struct MockTransport {
    hello: Mutex<VecDeque<MockReply>>,
    data: Mutex<VecDeque<MockReply>>,
    subscriptions: Mutex<VecDeque<MockSubscription>>,
    events: Mutex<Vec<TransportEvent>>,
    subscribed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            hello: Mutex::new(VecDeque::new()),
            data: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn push_hello(&self, reply: MockReply) {
        self.hello.lock().push_back(reply);
    }

    pub fn push_data(&self, reply: MockReply) {
        self.data.lock().push_back(reply);
    }

    /// Script the next subscription to succeed and return its feed.
    pub fn push_stream(&self) -> MockStreamHandle {
        let (frames, receiver) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .push_back(MockSubscription::Stream(receiver));
        MockStreamHandle { frames }
    }

    /// Script the next subscription to fail with `error`.
    pub fn push_subscribe_error(&self, error: SessionError) {
        self.subscriptions
            .lock()
            .push_back(MockSubscription::Error(error));
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Payloads of every `data` command received, in arrival order.
    pub fn data_payloads(&self) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Received(Command::Data(payload)) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn hello_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, TransportEvent::Received(Command::Hello)))
            .count()
    }

    /// Events URLs passed to `subscribe`, in call order.
    pub fn subscribed_urls(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    /// Highest number of `send` calls outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, command: &Command) -> MockReply {
        let scripted = match command {
            Command::Hello => self.hello.lock().pop_front(),
            Command::Data(_) => self.data.lock().pop_front(),
        };
        scripted.unwrap_or_else(|| match command {
            Command::Hello => MockReply::hello(MOCK_EVENTS_URL),
            Command::Data(_) => MockReply::Ok(json!({})),
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        _credentials: &Credentials,
        command: &Command,
    ) -> Result<Value, SessionError> {
        self.events
            .lock()
            .push(TransportEvent::Received(command.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let mut reply = self.next_reply(command);
        let result = loop {
            match reply {
                MockReply::Ok(value) => break Ok(value),
                MockReply::Error(e) => break Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    reply = *inner;
                }
            }
        };

        self.events
            .lock()
            .push(TransportEvent::Completed(command.clone()));
        result
    }

    async fn subscribe(&self, events_url: &str) -> Result<FrameStream, SessionError> {
        self.subscribed.lock().push(events_url.to_string());
        let scripted = self.subscriptions.lock().pop_front();
        match scripted {
            Some(MockSubscription::Stream(receiver)) => {
                Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
            }
            Some(MockSubscription::Error(e)) => Err(e),
            // Unscripted subscriptions stay open and silent.
            None => Ok(Box::pin(stream::pending())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn credentials() -> Credentials {
        Credentials::new("client-1", "s3cret").unwrap()
    }

    #[tokio::test]
    async fn scripted_replies_then_defaults() {
        let mock = MockTransport::new();
        mock.push_data(MockReply::Ok(json!({"n": 1})));
        mock.push_data(MockReply::server_error(503));

        let creds = credentials();
        let payload = Command::Data(json!("p"));
        assert_eq!(mock.send(&creds, &payload).await.unwrap(), json!({"n": 1}));
        assert!(mock.send(&creds, &payload).await.unwrap_err().is_retryable());
        assert_eq!(mock.send(&creds, &payload).await.unwrap(), json!({}));

        let hello = mock.send(&creds, &Command::Hello).await.unwrap();
        assert_eq!(hello["eventsUrl"], MOCK_EVENTS_URL);
        assert_eq!(mock.hello_count(), 1);
        assert_eq!(mock.data_payloads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let mock = MockTransport::new();
        mock.push_hello(MockReply::after(
            Duration::from_secs(2),
            MockReply::hello("/events/late"),
        ));

        let started = tokio::time::Instant::now();
        let hello = mock.send(&credentials(), &Command::Hello).await.unwrap();
        assert_eq!(hello["eventsUrl"], "/events/late");
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn records_arrival_and_completion() {
        let mock = MockTransport::new();
        let _ = mock.send(&credentials(), &Command::Hello).await;
        assert_eq!(
            mock.events(),
            vec![
                TransportEvent::Received(Command::Hello),
                TransportEvent::Completed(Command::Hello),
            ]
        );
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn scripted_stream_yields_fed_frames() {
        let mock = MockTransport::new();
        let handle = mock.push_stream();
        mock.push_subscribe_error(SessionError::SessionUnknown);

        let mut frames = mock.subscribe("/events/a").await.unwrap();
        assert!(handle.keep_alive());
        assert!(handle.message("note", json!({"text": "hi"})));
        handle.close();

        assert_eq!(frames.next().await.unwrap().unwrap(), StreamFrame::KeepAlive);
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            StreamFrame::message("note", json!({"text": "hi"}))
        );
        assert!(frames.next().await.is_none());

        let err = mock.subscribe("/events/a").await.err().unwrap();
        assert!(err.is_session_unknown());
        assert_eq!(mock.subscribed_urls(), vec!["/events/a", "/events/a"]);
    }

    #[tokio::test]
    async fn handle_notices_dropped_subscriber() {
        let mock = MockTransport::new();
        let handle = mock.push_stream();
        let frames = mock.subscribe("/events/a").await.unwrap();
        drop(frames);
        assert!(handle.is_closed());
        assert!(!handle.keep_alive());
    }
}
