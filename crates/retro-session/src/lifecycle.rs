//! Session lifecycle: handshake, activation, loss and explicit restart.
//!
//! ```text
//!  Idle ──start──▶ Handshaking ──hello ok──▶ Active ──unknown client──▶ Lost
//!                       ▲                                                 │
//!                       └──────────────────── restart ────────────────────┘
//! ```
//!
//! Every command channel carries the epoch of the session it belongs to.
//! Loss reports from a superseded epoch are ignored, which makes loss
//! notification idempotent even when the channel and the monitor both
//! detect it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use retro_core::{
    Command, Credentials, HelloResponse, InboundMessage, Liveness, SessionError, Transport,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::listeners::Listeners;
use crate::monitor::{EventMonitor, StreamObserver};
use crate::stats::{SessionCounters, SessionStats};

/// Public view of the lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Handshaking,
    Active,
    Lost,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Lost => "lost",
        }
    }
}

/// `None` until the handshake task has activated the session or given up.
type HandshakeOutcome = Option<Result<(), SessionError>>;

enum State {
    Idle {
        epoch: u64,
        channel: CommandChannel,
    },
    Handshaking {
        epoch: u64,
        channel: CommandChannel,
        outcome: watch::Receiver<HandshakeOutcome>,
    },
    Active {
        epoch: u64,
        channel: CommandChannel,
        // Dropping the monitor closes the subscription.
        _monitor: EventMonitor,
    },
    /// Commands submitted here go to a channel that is never opened.
    Lost {
        channel: CommandChannel,
    },
}

impl State {
    fn channel(&self) -> &CommandChannel {
        match self {
            Self::Idle { channel, .. }
            | Self::Handshaking { channel, .. }
            | Self::Active { channel, .. }
            | Self::Lost { channel } => channel,
        }
    }

    fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle { .. } => SessionPhase::Idle,
            Self::Handshaking { .. } => SessionPhase::Handshaking,
            Self::Active { .. } => SessionPhase::Active,
            Self::Lost { .. } => SessionPhase::Lost,
        }
    }

    fn is_active(&self, epoch: u64) -> bool {
        matches!(self, Self::Active { epoch: current, .. } if *current == epoch)
    }
}

struct Shared {
    this: Weak<Shared>,
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    config: SessionConfig,
    counters: Arc<SessionCounters>,
    next_epoch: AtomicU64,
    state: Mutex<State>,
    messages: Listeners<InboundMessage>,
    lagging: Listeners<bool>,
    lost: Listeners<()>,
    liveness: watch::Sender<Liveness>,
}

/// Client side of one room-service session.
///
/// Cheap to clone; clones drive the same session. Background tasks stop
/// when the last clone is dropped. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        config: SessionConfig,
    ) -> Self {
        let (liveness, _) = watch::channel(Liveness::Starting);
        let shared = Arc::new_cyclic(|this: &Weak<Shared>| {
            let counters = Arc::new(SessionCounters::default());
            let channel = new_channel(
                this,
                &transport,
                &credentials,
                &config,
                &counters,
                0,
            );
            Shared {
                this: this.clone(),
                transport,
                credentials,
                config,
                counters,
                next_epoch: AtomicU64::new(1),
                state: Mutex::new(State::Idle { epoch: 0, channel }),
                messages: Listeners::default(),
                lagging: Listeners::default(),
                lost: Listeners::default(),
                liveness,
            }
        });
        Self { shared }
    }

    /// Perform the handshake and activate the session.
    ///
    /// Retries until the server answers, so this only returns an error for
    /// an events URL that cannot be used at all. The handshake runs on its
    /// own task: every caller, including one arriving while a handshake is
    /// already in progress, waits for the same outcome, and dropping the
    /// returned future does not abandon it. From `Lost` this starts a fresh
    /// session with an empty command queue; while active it is a no-op.
    pub async fn start(&self) -> Result<(), SessionError> {
        let Some(mut outcome) = self.shared.begin_handshake() else {
            return Ok(());
        };
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => (*done).clone().unwrap_or(Ok(())),
            Err(_) => Err(SessionError::Network("handshake task ended".into())),
        };
        result
    }

    /// Start a new session after loss. Same as [`start`](Self::start).
    pub async fn restart(&self) -> Result<(), SessionError> {
        self.start().await
    }

    /// Queue a command behind every earlier one.
    ///
    /// Commands issued before the handshake completes are held until it
    /// does. If the session is lost before the command is delivered, or it
    /// is submitted while the session is lost, the future never resolves.
    pub fn send_command(
        &self,
        payload: Value,
    ) -> impl Future<Output = Result<Value, SessionError>> + Send + 'static {
        self.shared.state.lock().channel().submit(payload)
    }

    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.messages.add(listener);
    }

    pub fn on_lagging<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.lagging.add(move |lagging: &bool| listener(*lagging));
    }

    pub fn on_lost<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.lost.add(move |_: &()| listener());
    }

    pub fn liveness(&self) -> watch::Receiver<Liveness> {
        self.shared.liveness.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.state.lock().phase()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    pub fn client_id(&self) -> &str {
        self.shared.credentials.client_id()
    }
}

fn new_channel(
    this: &Weak<Shared>,
    transport: &Arc<dyn Transport>,
    credentials: &Credentials,
    config: &SessionConfig,
    counters: &Arc<SessionCounters>,
    epoch: u64,
) -> CommandChannel {
    let shared = this.clone();
    CommandChannel::new(
        transport.clone(),
        credentials.clone(),
        config.backoff,
        counters.clone(),
        Arc::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.session_lost(epoch, "command");
            }
        }),
    )
}

impl Shared {
    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn new_channel(&self, epoch: u64) -> CommandChannel {
        new_channel(
            &self.this,
            &self.transport,
            &self.credentials,
            &self.config,
            &self.counters,
            epoch,
        )
    }

    /// Move to `Handshaking` and spawn the handshake task, or join the one
    /// already running. `None` when the session is already active.
    fn begin_handshake(&self) -> Option<watch::Receiver<HandshakeOutcome>> {
        let mut state = self.state.lock();
        let (epoch, channel) = match &*state {
            State::Active { .. } => {
                debug!("start ignored, session already active");
                return None;
            }
            State::Handshaking { outcome, .. } => return Some(outcome.clone()),
            State::Idle { epoch, channel } => (*epoch, channel.clone()),
            State::Lost { .. } => {
                let epoch = self.next_epoch();
                (epoch, self.new_channel(epoch))
            }
        };
        let (done, outcome) = watch::channel(None);
        *state = State::Handshaking {
            epoch,
            channel,
            outcome: outcome.clone(),
        };
        drop(state);

        let _ = self.liveness.send_replace(Liveness::Starting);
        let _ = tokio::spawn(run_handshake(self.this.clone(), epoch, done));
        Some(outcome)
    }

    /// One hello round trip, returning the events URL to subscribe to.
    async fn hello(&self) -> Result<String, SessionError> {
        let hello = self
            .transport
            .send(&self.credentials, &Command::Hello)
            .await
            .and_then(HelloResponse::from_value)?;
        let events_url = self.transport.resolve_events_url(&hello.events_url)?;
        self.counters.record_handshake();
        info!(
            client_id = self.credentials.client_id(),
            events_url = %events_url,
            "handshake complete"
        );
        Ok(events_url)
    }

    /// `Handshaking(epoch)` to `Active`: subscribe and release the queue.
    fn activate(&self, epoch: u64, events_url: String) {
        let mut state = self.state.lock();
        let channel = match &*state {
            State::Handshaking {
                epoch: current,
                channel,
                ..
            } if *current == epoch => channel.clone(),
            _ => {
                debug!(epoch, "handshake superseded");
                return;
            }
        };
        let observer = Arc::new(SessionObserver {
            shared: self.this.clone(),
            epoch,
        });
        let monitor = EventMonitor::spawn(
            self.transport.clone(),
            events_url,
            &self.config,
            self.counters.clone(),
            observer,
        );
        channel.open();
        *state = State::Active {
            epoch,
            channel,
            _monitor: monitor,
        };
    }

    /// `Handshaking(epoch)` back to `Idle`, keeping the queued commands.
    fn abandon_handshake(&self, epoch: u64) {
        let mut state = self.state.lock();
        if let State::Handshaking {
            epoch: current,
            channel,
            ..
        } = &*state
        {
            if *current == epoch {
                let channel = channel.clone();
                *state = State::Idle { epoch, channel };
            }
        }
    }

    /// Move `Active(epoch)` to `Lost` and notify once. Anything else is a
    /// stale or repeated report.
    fn session_lost(&self, epoch: u64, source: &'static str) {
        {
            let mut state = self.state.lock();
            if !state.is_active(epoch) {
                debug!(epoch, source, "ignoring stale session loss");
                return;
            }
            let channel = self.new_channel(self.next_epoch());
            // Drops the monitor and the dead channel with it.
            *state = State::Lost { channel };
        }

        self.counters.record_loss();
        warn!(
            client_id = self.credentials.client_id(),
            source, "session lost, restart required"
        );
        let _ = self.liveness.send_replace(Liveness::Lost);
        self.lost.emit(&());
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().is_active(epoch)
    }
}

/// Retries the hello with backoff until it succeeds or the events URL turns
/// out to be unusable, then publishes the outcome. Stops early once the
/// session manager is gone.
async fn run_handshake(this: Weak<Shared>, epoch: u64, done: watch::Sender<HandshakeOutcome>) {
    let mut attempt = 0u32;
    loop {
        let Some(shared) = this.upgrade() else {
            debug!(epoch, "session dropped during handshake");
            return;
        };
        let error = match shared.hello().await {
            Ok(events_url) => {
                shared.activate(epoch, events_url);
                let _ = done.send_replace(Some(Ok(())));
                return;
            }
            Err(e @ SessionError::InvalidEndpoint(_)) => {
                warn!(error = %e, "handshake returned an unusable events URL");
                shared.abandon_handshake(epoch);
                let _ = done.send_replace(Some(Err(e)));
                return;
            }
            Err(e) => e,
        };
        attempt = attempt.saturating_add(1);
        let delay = shared.config.backoff.delay(attempt);
        warn!(
            client_id = shared.credentials.client_id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error_kind = error.error_kind(),
            error = %error,
            "handshake failed, retrying"
        );
        drop(shared);
        tokio::time::sleep(delay).await;
    }
}

/// Routes monitor events into the session that spawned the monitor.
struct SessionObserver {
    shared: Weak<Shared>,
    epoch: u64,
}

impl SessionObserver {
    fn current(&self) -> Option<Arc<Shared>> {
        self.shared
            .upgrade()
            .filter(|shared| shared.is_current(self.epoch))
    }
}

impl StreamObserver for SessionObserver {
    fn opened(&self) {
        if let Some(shared) = self.current() {
            let _ = shared.liveness.send_if_modified(|liveness| {
                if *liveness == Liveness::Starting {
                    *liveness = Liveness::Live;
                    true
                } else {
                    false
                }
            });
        }
    }

    fn lagging(&self, lagging: bool) {
        if let Some(shared) = self.current() {
            let next = if lagging {
                Liveness::Lagging
            } else {
                Liveness::Live
            };
            let _ = shared.liveness.send_replace(next);
            shared.lagging.emit(&lagging);
        }
    }

    fn message(&self, message: &InboundMessage) {
        if let Some(shared) = self.current() {
            shared.messages.emit(message);
        }
    }

    fn session_unknown(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.session_lost(self.epoch, "event stream");
        }
    }
}
