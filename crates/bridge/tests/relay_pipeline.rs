//! Integration test: drive a relay session with scripted connector events and assert what
//! reaches each network. No sockets are opened; both handles record their calls.

use async_trait::async_trait;
use bridge::channels::{
    DiscordAttachment, DiscordChannel, DiscordClient, DiscordEvent, DiscordGuild, DiscordHandle,
    DiscordMember, DiscordMessage, DiscordUser, IrcEvent, IrcHandle, TransportError,
};
use bridge::config::{BotConfig, RawBotConfig};
use bridge::diagnostics::Diagnostics;
use bridge::relay::{BotSession, LegState};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingIrc {
    said: Mutex<Vec<(String, String)>>,
    joined: Mutex<Vec<String>>,
    raw: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl IrcHandle for RecordingIrc {
    async fn say(&self, target: &str, text: &str) -> Result<(), TransportError> {
        self.said
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), TransportError> {
        self.joined.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    async fn send_raw(&self, args: &[String]) -> Result<(), TransportError> {
        self.raw.lock().unwrap().push(args.to_vec());
        Ok(())
    }

    fn stop(&self) {}
}

#[derive(Default)]
struct RecordingDiscord {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DiscordHandle for RecordingDiscord {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    fn stop(&self) {}
}

#[derive(Default)]
struct RecordingDiagnostics {
    info: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl Diagnostics for RecordingDiagnostics {
    fn debug(&self, _message: &str) {}

    fn info(&self, message: &str) {
        self.info.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    session: BotSession,
    irc: Arc<RecordingIrc>,
    discord: Arc<RecordingDiscord>,
    diag: Arc<RecordingDiagnostics>,
}

impl Harness {
    fn said(&self) -> Vec<(String, String)> {
        self.irc.said.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.discord.sent.lock().unwrap().clone()
    }
}

fn user(id: &str, name: &str) -> DiscordUser {
    DiscordUser {
        id: id.into(),
        username: name.into(),
        bot: false,
    }
}

fn config(extra: serde_json::Value) -> BotConfig {
    let mut value = json!({
        "server": "irc.example.net",
        "nickname": "relaybot",
        "discordToken": "token",
        "channelMapping": { "srv,#general": "#bridge" },
        "ircNickColor": false,
        "commandCharacters": ["!"]
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    let raw: RawBotConfig = serde_json::from_value(value).expect("raw config");
    BotConfig::from_raw(raw).expect("valid config")
}

fn guild() -> DiscordGuild {
    DiscordGuild {
        id: "srv".into(),
        name: "Server".into(),
        unavailable: false,
        channels: vec![
            DiscordChannel {
                id: "100".into(),
                kind: 0,
                name: Some("general".into()),
                guild_id: None,
            },
            DiscordChannel {
                id: "101".into(),
                kind: 0,
                name: Some("random".into()),
                guild_id: None,
            },
        ],
        members: vec![
            DiscordMember {
                user: Some(user("u-bob", "bob")),
            },
            DiscordMember {
                user: Some(user("u-alice", "alice")),
            },
        ],
    }
}

fn harness_with(config: BotConfig) -> Harness {
    let irc = Arc::new(RecordingIrc::default());
    let discord = Arc::new(RecordingDiscord::default());
    let diag = Arc::new(RecordingDiagnostics::default());
    let session = BotSession::new(&config, irc.clone(), discord.clone(), diag.clone());
    Harness {
        session,
        irc,
        discord,
        diag,
    }
}

async fn bring_live(session: &mut BotSession) {
    session.mark_connecting();
    session.handle_irc_event(registered("relaybot")).await;
    session
        .handle_discord_event(DiscordEvent::Ready {
            user: user("u-bot", "relay"),
        })
        .await;
    session
        .handle_discord_event(DiscordEvent::GuildAvailable(guild()))
        .await;
    assert!(session.is_live());
}

async fn live_harness_with(config: BotConfig) -> Harness {
    let mut h = harness_with(config);
    bring_live(&mut h.session).await;
    h
}

async fn live_harness() -> Harness {
    live_harness_with(config(json!({}))).await
}

fn discord_message(channel: &str, author: DiscordUser, content: &str) -> DiscordMessage {
    DiscordMessage {
        id: "m1".into(),
        channel_id: channel.into(),
        guild_id: Some("srv".into()),
        author,
        content: content.into(),
        mentions: Vec::new(),
        attachments: Vec::new(),
    }
}

fn registered(nick: &str) -> IrcEvent {
    IrcEvent::Registered {
        nick: nick.into(),
        message: "Welcome".into(),
    }
}

fn irc_message(author: &str, target: &str, text: &str) -> IrcEvent {
    IrcEvent::Message {
        author: author.into(),
        target: target.into(),
        text: text.into(),
    }
}

#[tokio::test]
async fn discord_message_reaches_irc() {
    let mut h = live_harness().await;
    h.session
        .handle_discord_event(DiscordEvent::Message(discord_message(
            "100",
            user("u-alice", "alice"),
            "hello",
        )))
        .await;
    assert_eq!(h.said(), vec![("#bridge".to_string(), "<alice> hello".to_string())]);
}

#[tokio::test]
async fn colored_author_on_irc() {
    let mut h = live_harness_with(config(json!({ "ircNickColor": true }))).await;
    h.session
        .handle_discord_event(DiscordEvent::Message(discord_message(
            "100",
            user("u-alice", "alice"),
            "hello",
        )))
        .await;
    assert_eq!(h.said()[0].1, "<\u{3}06alice\u{f}> hello");
}

#[tokio::test]
async fn irc_message_reaches_discord() {
    let mut h = live_harness().await;
    h.session
        .handle_irc_event(irc_message("bob", "#Bridge", "hi"))
        .await;
    assert_eq!(h.sent(), vec![("100".to_string(), "**<bob>** hi".to_string())]);
}

#[tokio::test]
async fn command_sent_with_preamble() {
    let mut h = live_harness().await;
    h.session
        .handle_discord_event(DiscordEvent::Message(discord_message(
            "100",
            user("u-alice", "alice"),
            "!ping",
        )))
        .await;
    assert_eq!(
        h.said(),
        vec![
            (
                "#bridge".to_string(),
                "Command sent from Discord by alice:".to_string()
            ),
            ("#bridge".to_string(), "!ping".to_string()),
        ]
    );
}

#[tokio::test]
async fn attachments_sent_as_urls() {
    let mut h = live_harness().await;
    let mut message = discord_message("100", user("u-alice", "alice"), "");
    message.attachments = vec![DiscordAttachment {
        url: "https://cdn.example/cat.png".into(),
        filename: "cat.png".into(),
    }];
    h.session
        .handle_discord_event(DiscordEvent::Message(message))
        .await;
    assert_eq!(
        h.said(),
        vec![(
            "#bridge".to_string(),
            "<alice> https://cdn.example/cat.png".to_string()
        )]
    );
}

fn attachment(url: &str) -> DiscordAttachment {
    DiscordAttachment {
        url: url.into(),
        filename: url.rsplit('/').next().unwrap_or_default().into(),
    }
}

#[tokio::test]
async fn text_and_each_attachment_sent_separately() {
    let mut h = live_harness().await;
    let mut message = discord_message("100", user("u-alice", "alice"), "look at these");
    message.attachments = vec![
        attachment("https://cdn.example/a.png"),
        attachment("https://cdn.example/b.png"),
    ];
    h.session
        .handle_discord_event(DiscordEvent::Message(message))
        .await;
    assert_eq!(
        h.said(),
        vec![
            ("#bridge".to_string(), "<alice> look at these".to_string()),
            ("#bridge".to_string(), "<alice> https://cdn.example/a.png".to_string()),
            ("#bridge".to_string(), "<alice> https://cdn.example/b.png".to_string()),
        ]
    );
}

#[tokio::test]
async fn command_drops_attachments() {
    let mut h = live_harness().await;
    let mut message = discord_message("100", user("u-alice", "alice"), "!ping");
    message.attachments = vec![attachment("https://cdn.example/a.png")];
    h.session
        .handle_discord_event(DiscordEvent::Message(message))
        .await;
    assert_eq!(
        h.said(),
        vec![
            (
                "#bridge".to_string(),
                "Command sent from Discord by alice:".to_string()
            ),
            ("#bridge".to_string(), "!ping".to_string()),
        ]
    );
}

#[tokio::test]
async fn unmapped_channels_dropped() {
    let mut h = live_harness().await;
    h.session
        .handle_discord_event(DiscordEvent::Message(discord_message(
            "101",
            user("u-alice", "alice"),
            "hello",
        )))
        .await;
    h.session
        .handle_irc_event(irc_message("bob", "#elsewhere", "hi"))
        .await;
    assert!(h.said().is_empty());
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn own_messages_not_echoed() {
    let mut h = live_harness().await;
    h.session
        .handle_discord_event(DiscordEvent::Message(discord_message(
            "100",
            user("u-bot", "relay"),
            "<alice> hello",
        )))
        .await;
    h.session
        .handle_irc_event(irc_message("RelayBot", "#bridge", "**<bob>** hi"))
        .await;
    assert!(h.said().is_empty());
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn self_echo_follows_assigned_nick() {
    let mut h = live_harness().await;
    h.session.handle_irc_event(registered("relaybot_")).await;
    h.session
        .handle_irc_event(irc_message("relaybot", "#bridge", "this nick is mine"))
        .await;
    h.session
        .handle_irc_event(irc_message("relaybot_", "#bridge", "<alice> hello"))
        .await;
    assert_eq!(
        h.sent(),
        vec![(
            "100".to_string(),
            "**<relaybot>** this nick is mine".to_string()
        )]
    );
}

#[tokio::test]
async fn direct_messages_ignored() {
    let mut h = live_harness().await;
    let mut message = discord_message("100", user("u-alice", "alice"), "psst");
    message.guild_id = None;
    h.session
        .handle_discord_event(DiscordEvent::Message(message))
        .await;
    assert!(h.said().is_empty());
}

#[tokio::test]
async fn notice_and_action_decorated() {
    let mut h = live_harness().await;
    h.session
        .handle_irc_event(IrcEvent::Notice {
            author: "bob".into(),
            target: "#bridge".into(),
            text: "heads up".into(),
        })
        .await;
    h.session
        .handle_irc_event(IrcEvent::Action {
            author: "bob".into(),
            target: "#bridge".into(),
            text: "waves".into(),
        })
        .await;
    assert_eq!(
        h.sent(),
        vec![
            ("100".to_string(), "**<bob>** *heads up*".to_string()),
            ("100".to_string(), "**<bob>** _waves_".to_string()),
        ]
    );
}

#[tokio::test]
async fn irc_mentions_expanded_for_known_users() {
    let mut h = live_harness().await;
    h.session
        .handle_irc_event(irc_message("carol", "#bridge", "hey @alice and @nobody"))
        .await;
    assert_eq!(h.sent()[0].1, "**<carol>** hey <@u-alice> and @nobody");
}

#[tokio::test]
async fn discord_references_resolved_for_irc() {
    let mut h = live_harness().await;
    let mut message = discord_message(
        "100",
        user("u-alice", "alice"),
        "<@u-bob> see <#101>\nand <#999>",
    );
    message.mentions = vec![user("u-bob", "bob")];
    h.session
        .handle_discord_event(DiscordEvent::Message(message))
        .await;
    assert_eq!(h.said()[0].1, "<alice> @bob see #random and <#999>");
}

#[tokio::test]
async fn invite_joins_only_bridged_channels() {
    let mut h = live_harness().await;
    h.session
        .handle_irc_event(IrcEvent::Invite {
            channel: "#bridge".into(),
            from: "op".into(),
        })
        .await;
    h.session
        .handle_irc_event(IrcEvent::Invite {
            channel: "#other".into(),
            from: "op".into(),
        })
        .await;
    assert_eq!(*h.irc.joined.lock().unwrap(), vec!["#bridge".to_string()]);
}

#[tokio::test]
async fn auto_send_commands_on_registration() {
    let h = live_harness_with(config(json!({
        "autoSendCommands": [["PRIVMSG", "NickServ", "IDENTIFY pw"], ["MODE", "relaybot", "+B"]]
    })))
    .await;
    assert_eq!(
        *h.irc.raw.lock().unwrap(),
        vec![
            vec!["PRIVMSG".to_string(), "NickServ".into(), "IDENTIFY pw".into()],
            vec!["MODE".to_string(), "relaybot".into(), "+B".into()],
        ]
    );
}

#[tokio::test]
async fn nothing_forwarded_before_both_sides_live() {
    let mut h = harness_with(config(json!({})));
    h.session.mark_connecting();
    assert_eq!(h.session.irc_state(), LegState::Connecting);
    h.session
        .handle_discord_event(DiscordEvent::GuildAvailable(guild()))
        .await;
    h.session
        .handle_irc_event(registered("relaybot"))
        .await;
    h.session
        .handle_irc_event(irc_message("bob", "#bridge", "too early"))
        .await;
    assert_eq!(h.session.irc_state(), LegState::Live);
    assert_eq!(h.session.discord_state(), LegState::Connecting);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn missing_discord_channel_logged() {
    let mut h = harness_with(config(json!({})));
    h.session
        .handle_irc_event(registered("relaybot"))
        .await;
    h.session
        .handle_discord_event(DiscordEvent::Ready {
            user: user("u-bot", "relay"),
        })
        .await;
    h.session
        .handle_irc_event(irc_message("bob", "#bridge", "anyone?"))
        .await;
    assert!(h.sent().is_empty());
    let info = h.diag.info.lock().unwrap();
    assert!(info
        .iter()
        .any(|m| m.contains("Tried to send a message to a channel the bot isn't in")));
}

#[tokio::test]
async fn transport_errors_logged() {
    let mut h = live_harness().await;
    h.session
        .handle_irc_event(IrcEvent::Error("Nickname is already in use".into()))
        .await;
    h.session
        .handle_discord_event(DiscordEvent::Error("gateway closed".into()))
        .await;
    assert_eq!(h.diag.errors.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn run_drains_both_streams() {
    let h = harness_with(config(json!({})));
    let (irc_tx, irc_rx) = mpsc::channel(16);
    let (discord_tx, discord_rx) = mpsc::channel(16);
    let task = tokio::spawn(h.session.run(irc_rx, discord_rx));

    discord_tx
        .send(DiscordEvent::Ready {
            user: user("u-bot", "relay"),
        })
        .await
        .unwrap();
    discord_tx
        .send(DiscordEvent::GuildAvailable(guild()))
        .await
        .unwrap();
    irc_tx
        .send(registered("relaybot"))
        .await
        .unwrap();
    // Wait until the session has taken every readiness event off both queues.
    while discord_tx.capacity() < discord_tx.max_capacity()
        || irc_tx.capacity() < irc_tx.max_capacity()
    {
        tokio::task::yield_now().await;
    }
    irc_tx
        .send(irc_message("bob", "#bridge", "hi"))
        .await
        .unwrap();
    drop(discord_tx);
    drop(irc_tx);

    task.await.unwrap();
    assert_eq!(
        *h.discord.sent.lock().unwrap(),
        vec![("100".to_string(), "**<bob>** hi".to_string())]
    );
}

#[tokio::test]
async fn stalled_discord_delivery_does_not_block_session() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = Arc::new(DiscordClient::with_endpoints(
        "token",
        format!("http://{}", addr),
        format!("ws://{}", addr),
    ));
    let (discord_tx, _discord_rx) = mpsc::channel(16);
    let worker = client.clone().start(discord_tx);
    let irc = Arc::new(RecordingIrc::default());
    let mut session = BotSession::new(
        &config(json!({})),
        irc.clone(),
        client.clone(),
        Arc::new(RecordingDiagnostics::default()),
    );
    bring_live(&mut session).await;

    let relay = async {
        session
            .handle_irc_event(irc_message("bob", "#bridge", "hi"))
            .await;
        session
            .handle_discord_event(DiscordEvent::Message(discord_message(
                "100",
                user("u-alice", "alice"),
                "hello",
            )))
            .await;
    };
    tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("session waited on a Discord send");
    assert_eq!(
        *irc.said.lock().unwrap(),
        vec![("#bridge".to_string(), "<alice> hello".to_string())]
    );

    DiscordHandle::stop(client.as_ref());
    worker.abort();
}
