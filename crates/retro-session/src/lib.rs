//! Client-side session and command delivery for the retro room service.
//!
//! [`SessionManager`] performs the handshake, keeps the event stream alive,
//! delivers commands strictly in order and reports session loss. The
//! pieces it composes are usable on their own:
//!
//! - [`Backoff`]: attempt number to retry delay
//! - [`CommandChannel`]: ordered, one-at-a-time command delivery
//! - [`EventMonitor`]: event stream subscription and keep-alive liveness
//! - [`HttpTransport`]: reqwest implementation of [`retro_core::Transport`]

pub mod backoff;
pub mod channel;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod listeners;
pub mod monitor;
pub mod sse;
pub mod stats;

pub mod mock;

pub use backoff::Backoff;
pub use channel::CommandChannel;
pub use config::SessionConfig;
pub use http::HttpTransport;
pub use lifecycle::{SessionManager, SessionPhase};
pub use monitor::{EventMonitor, StreamObserver};
pub use mock::{MockReply, MockStreamHandle, MockTransport, TransportEvent};
pub use stats::SessionStats;
