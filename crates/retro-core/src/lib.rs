pub mod credentials;
pub mod errors;
pub mod liveness;
pub mod transport;
pub mod wire;

pub use credentials::{Credentials, CredentialsError};
pub use errors::SessionError;
pub use liveness::Liveness;
pub use transport::{FrameStream, Transport};
pub use wire::{
    Command, HelloResponse, InboundMessage, StreamFrame, WireCommand, KEEP_ALIVE_EVENT,
    UNKNOWN_CLIENT_BODY,
};
