// tydom-api: Async Rust client for the Tydom gateway protocol (Digest auth, HTTP over WebSocket)

pub mod activity;
pub mod cloud;
pub mod command;
pub mod connection;
pub mod digest;
pub mod error;
pub mod http_frame;
pub mod transport;

pub use activity::ActivityFlag;
pub use cloud::{CloudClient, CloudConfig, CloudCredentials, CloudGateway};
pub use command::{Method, TydomCommand};
pub use connection::{
    ConnectionConfig, ConnectionMode, KeepAliveConfig, PasswordSource, TydomConnection,
};
pub use digest::DigestChallenge;
pub use error::Error;
pub use http_frame::{FrameParseError, Headers, TydomHttpFrame, TydomRawMessage};
pub use transport::{TlsMode, TransportConfig};
