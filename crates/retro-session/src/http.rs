use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use retro_core::{Command, Credentials, FrameStream, SessionError, Transport, WireCommand};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::SessionConfig;
use crate::sse::SseFrameStream;

/// [`Transport`] over HTTP: commands are POSTed to `{base}/command` and the
/// event stream is read as server-sent events.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    command_url: Url,
    stream_idle_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, config: &SessionConfig) -> Result<Self, SessionError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SessionError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        let command_url = command_url(&base_url)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::Network(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            command_url,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    pub fn command_url(&self) -> &Url {
        &self.command_url
    }

    /// Paths are taken relative to the base URL's origin; absolute URLs are
    /// used as given.
    fn events_url(&self, events_url: &str) -> Result<Url, SessionError> {
        self.base_url
            .join(events_url)
            .map_err(|e| SessionError::InvalidEndpoint(format!("{events_url}: {e}")))
    }
}

fn command_url(base_url: &Url) -> Result<Url, SessionError> {
    let mut url = base_url.clone();
    let _ = url
        .path_segments_mut()
        .map_err(|()| SessionError::InvalidEndpoint(format!("{base_url}: cannot be a base URL")))?
        .pop_if_empty()
        .push("command");
    Ok(url)
}

fn network_error(e: reqwest::Error) -> SessionError {
    SessionError::Network(e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        credentials: &Credentials,
        command: &Command,
    ) -> Result<Value, SessionError> {
        let body = WireCommand {
            name: command.name(),
            client_id: credentials.client_id(),
            secret: credentials.expose_secret(),
            payload: command.payload(),
        };

        let response = self
            .client
            .post(self.command_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let text = response.text().await.map_err(network_error)?;
        debug!(
            command = command.name(),
            status = status.as_u16(),
            "command response"
        );

        if status != StatusCode::OK {
            return Err(SessionError::from_response(
                command.name(),
                status.as_u16(),
                text,
            ));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            SessionError::Decode(format!("{} response is not JSON: {e}", command.name()))
        })
    }

    fn resolve_events_url(&self, events_url: &str) -> Result<String, SessionError> {
        let url = self.events_url(events_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url.into()),
            scheme => Err(SessionError::InvalidEndpoint(format!(
                "{events_url}: unsupported scheme {scheme}"
            ))),
        }
    }

    async fn subscribe(&self, events_url: &str) -> Result<FrameStream, SessionError> {
        let url = self.events_url(events_url)?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::from_response("events", status.as_u16(), body));
        }

        debug!(events_url, "event stream open");
        Ok(Box::pin(SseFrameStream::new(
            response.bytes_stream(),
            self.stream_idle_timeout,
        )))
    }
}
