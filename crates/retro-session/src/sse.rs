//! Server-sent events decoding for the room service's event stream.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use retro_core::{SessionError, StreamFrame};
use tokio::time::{Instant, Sleep};
use tracing::warn;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Largest event the decoder buffers before giving up on the stream.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Extract the `data` of one SSE event block.
///
/// Multiple `data:` lines are joined with `\n`; comments and the `event`,
/// `id` and `retry` fields are ignored. Returns `None` for a block without
/// data, such as a bare comment.
pub fn parse_sse_data(block: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    data
}

/// Decodes an SSE byte stream into [`StreamFrame`]s.
///
/// Frames that fail to decode are logged and skipped. A transport error,
/// `idle_timeout` without any bytes, or an event larger than
/// [`MAX_EVENT_BYTES`] yields one `StreamInterrupted` item and ends the
/// stream.
pub struct SseFrameStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a blank line.
    scanned: usize,
    pending: VecDeque<StreamFrame>,
    failed: Option<SessionError>,
    idle_deadline: Pin<Box<Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseFrameStream {
    pub fn new<S, E>(bytes: S, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            inner: Box::pin(bytes.map(|chunk| chunk.map_err(|e| e.to_string()))),
            buffer: Vec::new(),
            scanned: 0,
            pending: VecDeque::new(),
            failed: None,
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        loop {
            // Step back one byte so a separator split across chunks is found.
            let from = self.scanned.saturating_sub(1);
            match self.buffer[from..].windows(2).position(|w| w == b"\n\n") {
                Some(pos) => {
                    let block: Vec<u8> = self.buffer.drain(..from + pos + 2).collect();
                    self.scanned = 0;
                    self.decode_block(&block);
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        if self.buffer.len() > MAX_EVENT_BYTES {
            let size = self.buffer.len();
            self.buffer = Vec::new();
            self.scanned = 0;
            self.failed = Some(SessionError::StreamInterrupted(format!(
                "event exceeds {MAX_EVENT_BYTES} bytes ({size} buffered)"
            )));
        }
    }

    fn decode_block(&mut self, block: &[u8]) {
        let text = String::from_utf8_lossy(block);
        let Some(data) = parse_sse_data(&text) else {
            return;
        };
        match StreamFrame::parse(&data) {
            Ok(frame) => self.pending.push_back(frame),
            Err(e) => warn!(error = %e, data = %data, "skipping undecodable stream frame"),
        }
    }
}

impl Stream for SseFrameStream {
    type Item = Result<StreamFrame, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(frame) = self.pending.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(e) = self.failed.take() {
            self.finished = true;
            return Poll::Ready(Some(Err(e)));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    self.push_bytes(&bytes);
                    if let Some(frame) = self.pending.pop_front() {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                    if let Some(e) = self.failed.take() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(SessionError::StreamInterrupted(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.decode_block(&remaining);
                    }
                    return Poll::Ready(self.pending.pop_front().map(Ok));
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(SessionError::StreamInterrupted(format!(
                            "no data for {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
