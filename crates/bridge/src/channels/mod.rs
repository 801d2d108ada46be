//! Network connectors (IRC and Discord).
//!
//! Each connector pushes typed events into an mpsc channel consumed by the relay session and
//! exposes a handle trait the session sends through. Reconnection and flood control live here,
//! not in the relay.

pub mod discord;
pub mod irc;

use async_trait::async_trait;

pub use discord::{
    DiscordAttachment, DiscordChannel, DiscordClient, DiscordEvent, DiscordGuild, DiscordMember,
    DiscordMessage, DiscordUser,
};
pub use irc::{IrcClient, IrcConnectOptions, IrcEvent, IrcLine};

/// Connection-level failures. Logged by callers; never fatal to a session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

/// Outbound side of an IRC connection.
#[async_trait]
pub trait IrcHandle: Send + Sync {
    /// PRIVMSG `text` to a channel or nick.
    async fn say(&self, target: &str, text: &str) -> Result<(), TransportError>;
    async fn join(&self, channel: &str) -> Result<(), TransportError>;
    /// Send a raw command from its argument list, e.g. `["MODE", "bot", "+B"]`.
    async fn send_raw(&self, args: &[String]) -> Result<(), TransportError>;
    /// Stop the connector.
    fn stop(&self);
}

/// Outbound side of a Discord connection.
#[async_trait]
pub trait DiscordHandle: Send + Sync {
    /// Post a text message to a channel by id.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError>;
    /// Stop the connector.
    fn stop(&self);
}
