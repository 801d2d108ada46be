//! Discord channel: gateway websocket for inbound events and REST createMessage for sends.

use crate::channels::{DiscordHandle, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on one createMessage request, connect included.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const SEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

/// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 1) | (1 << 9) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Text-like channel types: GUILD_TEXT and GUILD_ANNOUNCEMENT.
const TEXT_CHANNEL_KINDS: [u8; 2] = [0, 5];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
}

impl DiscordChannel {
    pub fn is_text(&self) -> bool {
        TEXT_CHANNEL_KINDS.contains(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordMember {
    #[serde(default)]
    pub user: Option<DiscordUser>,
}

/// GUILD_CREATE payload (subset).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordGuild {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub channels: Vec<DiscordChannel>,
    #[serde(default)]
    pub members: Vec<DiscordMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordAttachment {
    pub url: String,
    #[serde(default)]
    pub filename: String,
}

/// MESSAGE_CREATE payload (subset). `guild_id` is absent for direct messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<DiscordUser>,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    user: DiscordUser,
}

/// Events delivered to the relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordEvent {
    /// Identified; carries the bot's own user.
    Ready { user: DiscordUser },
    GuildAvailable(DiscordGuild),
    ChannelUpdated(DiscordChannel),
    Message(DiscordMessage),
    Error(String),
}

#[derive(Debug, Deserialize)]
struct GatewayFrame {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Map a gateway dispatch to a relay event. Unhandled dispatch types yield None.
pub(crate) fn dispatch_event(
    kind: &str,
    data: serde_json::Value,
) -> Result<Option<DiscordEvent>, serde_json::Error> {
    let event = match kind {
        "READY" => {
            let ready: ReadyPayload = serde_json::from_value(data)?;
            Some(DiscordEvent::Ready { user: ready.user })
        }
        "GUILD_CREATE" => {
            let guild: DiscordGuild = serde_json::from_value(data)?;
            (!guild.unavailable).then_some(DiscordEvent::GuildAvailable(guild))
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            Some(DiscordEvent::ChannelUpdated(serde_json::from_value(data)?))
        }
        "MESSAGE_CREATE" => Some(DiscordEvent::Message(serde_json::from_value(data)?)),
        _ => None,
    };
    Ok(event)
}

/// Close codes after which reconnecting cannot succeed (bad token, bad intents, ...).
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010 | 4011 | 4012 | 4013 | 4014)
}

enum GatewayEnd {
    Shutdown,
    EventsClosed,
    Reconnect(String),
    Fatal(String),
}

/// A message waiting for delivery: channel id and text.
type Outgoing = (String, String);

/// Discord connector: keeps a gateway session alive and posts messages over REST.
///
/// [`DiscordHandle::send_message`] only queues; a worker started by [`DiscordClient::start`]
/// delivers the queue in order.
pub struct DiscordClient {
    token: String,
    api_base: String,
    gateway_url: String,
    client: reqwest::Client,
    outbound: mpsc::UnboundedSender<Outgoing>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    shutdown: watch::Sender<bool>,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoints(token, discord_api_base(), DISCORD_GATEWAY_URL)
    }

    /// Client against custom REST and gateway endpoints.
    pub fn with_endpoints(
        token: impl Into<String>,
        api_base: impl Into<String>,
        gateway_url: impl Into<String>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .connect_timeout(SEND_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("discord: http client with timeouts unavailable: {}", e);
                reqwest::Client::new()
            });
        Self {
            token: token.into(),
            api_base: api_base.into(),
            gateway_url: gateway_url.into(),
            client,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown,
        }
    }

    fn running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Start the gateway loop and the delivery worker, forwarding events to the session.
    /// Returns a handle to await on shutdown.
    pub fn start(self: Arc<Self>, events: mpsc::Sender<DiscordEvent>) -> JoinHandle<()> {
        log::info!("discord channel: starting gateway loop");
        tokio::spawn(async move {
            tokio::join!(
                run_gateway_loop(self.clone(), events.clone()),
                run_delivery(self, events)
            );
        })
    }

    /// Queue a message for delivery. Fails only once the client has stopped.
    fn enqueue(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        if !self.running() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send((channel_id.to_string(), text.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Outgoing>> {
        self.outbound_rx.lock().ok()?.take()
    }

    /// Post a text message to a channel via createMessage. Only user mentions are allowed to ping.
    pub async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let body = json!({
            "content": text,
            "allowed_mentions": { "parse": ["users"] }
        });
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "createMessage failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }

    fn identify_frame(&self) -> Message {
        let frame = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "discord-irc",
                    "device": "discord-irc"
                }
            }
        });
        Message::Text(frame.to_string())
    }
}

/// Tracks whether the last scheduled heartbeat was acknowledged (op 11).
#[derive(Debug, Default)]
struct HeartbeatTracker {
    awaiting_ack: bool,
}

impl HeartbeatTracker {
    /// Record a scheduled heartbeat. Returns false when the previous one was never
    /// acknowledged, i.e. the connection is dead.
    fn beat(&mut self) -> bool {
        if self.awaiting_ack {
            return false;
        }
        self.awaiting_ack = true;
        true
    }

    fn ack(&mut self) {
        self.awaiting_ack = false;
    }
}

fn heartbeat_frame(seq: Option<u64>) -> Message {
    Message::Text(json!({ "op": OP_HEARTBEAT, "d": seq }).to_string())
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Deliver queued messages one at a time until shutdown. Failures are reported to the session
/// without waiting for room in its queue.
async fn run_delivery(client: Arc<DiscordClient>, events: mpsc::Sender<DiscordEvent>) {
    let Some(mut outbound_rx) = client.take_outbound() else {
        log::error!("discord channel: delivery worker already started");
        return;
    };
    let mut shutdown = client.shutdown.subscribe();
    while client.running() {
        let (channel_id, text) = tokio::select! {
            _ = shutdown.changed() => break,
            next = outbound_rx.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = client.post_message(&channel_id, &text) => result,
        };
        if let Err(e) = result {
            log::warn!("discord: delivery to {} failed: {}", channel_id, e);
            let _ = events.try_send(DiscordEvent::Error(format!(
                "sending to channel {} failed: {}",
                channel_id, e
            )));
        }
    }
    log::debug!("discord channel: delivery worker stopped");
}

async fn run_gateway_loop(client: Arc<DiscordClient>, events: mpsc::Sender<DiscordEvent>) {
    let mut shutdown = client.shutdown.subscribe();
    while client.running() {
        match run_gateway_session(&client, &events, &mut shutdown).await {
            Ok(GatewayEnd::Shutdown) | Ok(GatewayEnd::EventsClosed) => break,
            Ok(GatewayEnd::Reconnect(reason)) => {
                log::info!("discord: reconnecting ({})", reason);
            }
            Ok(GatewayEnd::Fatal(reason)) => {
                log::error!(
                    "discord: gateway refused the session, not reconnecting: {}",
                    reason
                );
                let _ = events.send(DiscordEvent::Error(reason)).await;
                break;
            }
            Err(e) => {
                log::warn!("discord gateway error: {}", e);
                if events.send(DiscordEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
            }
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    log::info!("discord channel: gateway loop stopped");
}

/// One gateway connection: Hello -> Identify -> heartbeat + dispatch until closed.
async fn run_gateway_session(
    client: &DiscordClient,
    events: &mpsc::Sender<DiscordEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<GatewayEnd, TransportError> {
    let (ws, _) = tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio_tungstenite::connect_async(client.gateway_url.as_str()),
    )
    .await
    .map_err(|_| TransportError::Timeout)??;
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat: Option<Interval> = None;
    let mut beats = HeartbeatTracker::default();
    let mut seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(GatewayEnd::Shutdown);
            }
            _ = tick(&mut heartbeat) => {
                if !beats.beat() {
                    return Ok(GatewayEnd::Reconnect("heartbeat not acknowledged".to_string()));
                }
                sink.send(heartbeat_frame(seq)).await?;
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Ok(GatewayEnd::Reconnect("gateway stream ended".to_string()));
                };
                match msg? {
                    Message::Text(text) => {
                        let frame: GatewayFrame = serde_json::from_str(&text)?;
                        if let Some(s) = frame.s {
                            seq = Some(s);
                        }
                        match frame.op {
                            OP_DISPATCH => {
                                let Some(kind) = frame.t.as_deref() else { continue };
                                match dispatch_event(kind, frame.d) {
                                    Ok(Some(event)) => {
                                        if events.send(event).await.is_err() {
                                            return Ok(GatewayEnd::EventsClosed);
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        log::debug!("discord: skipping malformed {}: {}", kind, e)
                                    }
                                }
                            }
                            OP_HELLO => {
                                let period = frame
                                    .d
                                    .get("heartbeat_interval")
                                    .and_then(|v| v.as_u64())
                                    .unwrap_or(DEFAULT_HEARTBEAT_MS);
                                let period = Duration::from_millis(period);
                                let first = Instant::now() + period;
                                heartbeat = Some(tokio::time::interval_at(first, period));
                                beats = HeartbeatTracker::default();
                                sink.send(client.identify_frame()).await?;
                            }
                            OP_HEARTBEAT => {
                                sink.send(heartbeat_frame(seq)).await?;
                            }
                            OP_HEARTBEAT_ACK => beats.ack(),
                            OP_RECONNECT => {
                                let reason = "server requested reconnect".to_string();
                                return Ok(GatewayEnd::Reconnect(reason));
                            }
                            OP_INVALID_SESSION => {
                                return Ok(GatewayEnd::Reconnect("invalid session".to_string()));
                            }
                            _ => {}
                        }
                    }
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        let description = format!("gateway closed: {} {}", code, reason);
                        if is_fatal_close(code) {
                            return Ok(GatewayEnd::Fatal(description));
                        }
                        return Ok(GatewayEnd::Reconnect(description));
                    }
                    _ => {}
                }
            }
        }
    }
}

#[async_trait]
impl DiscordHandle for DiscordClient {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        self.enqueue(channel_id, text)
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Resolve Discord REST API base URL (for tests or custom endpoints).
pub fn discord_api_base() -> String {
    std::env::var("DISCORD_API_BASE").unwrap_or_else(|_| DISCORD_API_BASE.to_string())
}
