use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::credentials::Credentials;
use crate::errors::SessionError;
use crate::wire::{Command, StreamFrame};

/// Frames from one subscription, in transport order. The stream ends when
/// the underlying connection closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, SessionError>> + Send>>;

/// The two channels to the room service: request/response commands and the
/// one-way event stream. Implementations classify failures into
/// [`SessionError`] but never retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one command and return the JSON result body.
    async fn send(&self, credentials: &Credentials, command: &Command)
        -> Result<Value, SessionError>;

    /// Turn the handshake's events URL into the one to subscribe to, or
    /// reject it with [`SessionError::InvalidEndpoint`]. Called once per
    /// handshake, before the session becomes active.
    fn resolve_events_url(&self, events_url: &str) -> Result<String, SessionError> {
        Ok(events_url.to_string())
    }

    /// Open the event stream at a URL returned by
    /// [`resolve_events_url`](Self::resolve_events_url).
    async fn subscribe(&self, events_url: &str) -> Result<FrameStream, SessionError>;
}
