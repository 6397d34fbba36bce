use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of a session's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub handshakes: u64,
    pub commands_delivered: u64,
    pub command_retries: u64,
    pub stream_opens: u64,
    pub stream_reconnects: u64,
    pub sessions_lost: u64,
}

/// Live counters shared by the session, its command worker and its monitor.
#[derive(Debug, Default)]
pub struct SessionCounters {
    handshakes: AtomicU64,
    commands_delivered: AtomicU64,
    command_retries: AtomicU64,
    stream_opens: AtomicU64,
    stream_reconnects: AtomicU64,
    sessions_lost: AtomicU64,
}

impl SessionCounters {
    pub fn record_handshake(&self) {
        let _ = self.handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        let _ = self.commands_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        let _ = self.command_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A subscription opened. `reconnect` is false for the first open of
    /// each session's stream.
    pub fn record_stream_open(&self, reconnect: bool) {
        let _ = self.stream_opens.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            let _ = self.stream_reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_loss(&self) {
        let _ = self.sessions_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            handshakes: self.handshakes.load(Ordering::Relaxed),
            commands_delivered: self.commands_delivered.load(Ordering::Relaxed),
            command_retries: self.command_retries.load(Ordering::Relaxed),
            stream_opens: self.stream_opens.load(Ordering::Relaxed),
            stream_reconnects: self.stream_reconnects.load(Ordering::Relaxed),
            sessions_lost: self.sessions_lost.load(Ordering::Relaxed),
        }
    }
}
