//! Relay session: one per configured bridge pair.
//!
//! The session owns the channel mapping, the Discord directory snapshot and both outbound
//! handles. Events from either network are handled one at a time, to completion, in arrival
//! order. Forwarding starts once both connections have signalled readiness at least once.

use crate::channels::{DiscordEvent, DiscordHandle, DiscordMessage, IrcEvent, IrcHandle};
use crate::command::CommandGate;
use crate::config::BotConfig;
use crate::diagnostics::Diagnostics;
use crate::directory::DiscordDirectory;
use crate::format;
use crate::mapping::{self, ChannelMapping};
use crate::message::RelayMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection state of one network leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    Disconnected,
    Connecting,
    Live,
}

pub struct BotSession {
    /// Current IRC nickname: the configured one until the server assigns another.
    irc_nick: String,
    mapping: ChannelMapping,
    commands: CommandGate,
    nick_color: bool,
    auto_send_commands: Vec<Vec<String>>,
    irc: Arc<dyn IrcHandle>,
    discord: Arc<dyn DiscordHandle>,
    diag: Arc<dyn Diagnostics>,
    directory: DiscordDirectory,
    discord_user_id: Option<String>,
    irc_state: LegState,
    discord_state: LegState,
}

impl BotSession {
    pub fn new(
        config: &BotConfig,
        irc: Arc<dyn IrcHandle>,
        discord: Arc<dyn DiscordHandle>,
        diag: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            irc_nick: config.nickname.clone(),
            mapping: ChannelMapping::build(&config.channel_mapping),
            commands: CommandGate::new(&config.command_characters),
            nick_color: config.irc_nick_color,
            auto_send_commands: config.auto_send_commands.clone(),
            irc,
            discord,
            diag,
            directory: DiscordDirectory::new(),
            discord_user_id: None,
            irc_state: LegState::Disconnected,
            discord_state: LegState::Disconnected,
        }
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }

    /// Called when the connectors have been started.
    pub fn mark_connecting(&mut self) {
        self.diag.debug("Connecting to IRC and Discord");
        if self.irc_state == LegState::Disconnected {
            self.irc_state = LegState::Connecting;
        }
        if self.discord_state == LegState::Disconnected {
            self.discord_state = LegState::Connecting;
        }
    }

    pub fn irc_state(&self) -> LegState {
        self.irc_state
    }

    pub fn discord_state(&self) -> LegState {
        self.discord_state
    }

    pub fn is_live(&self) -> bool {
        self.irc_state == LegState::Live && self.discord_state == LegState::Live
    }

    /// Consume events from both connectors until both streams close.
    pub async fn run(
        mut self,
        mut irc_events: mpsc::Receiver<IrcEvent>,
        mut discord_events: mpsc::Receiver<DiscordEvent>,
    ) {
        let mut irc_open = true;
        let mut discord_open = true;
        while irc_open || discord_open {
            tokio::select! {
                event = irc_events.recv(), if irc_open => match event {
                    Some(event) => self.handle_irc_event(event).await,
                    None => irc_open = false,
                },
                event = discord_events.recv(), if discord_open => match event {
                    Some(event) => self.handle_discord_event(event).await,
                    None => discord_open = false,
                },
            }
        }
        self.diag.debug("event streams closed, session finished");
    }

    pub async fn handle_irc_event(&mut self, event: IrcEvent) {
        match event {
            IrcEvent::Registered { nick, message } => {
                self.irc_state = LegState::Live;
                self.diag.debug(&format!("Registered as {}: {}", nick, message));
                self.irc_nick = nick;
                for command in &self.auto_send_commands {
                    if let Err(e) = self.irc.send_raw(command).await {
                        self.diag.error(&format!("auto-send command {:?} failed: {}", command, e));
                    }
                }
            }
            IrcEvent::Message { author, target, text } => {
                self.send_to_discord(&author, &target, text).await;
            }
            IrcEvent::Notice { author, target, text } => {
                self.send_to_discord(&author, &target, format::notice_text(&text)).await;
            }
            IrcEvent::Action { author, target, text } => {
                self.send_to_discord(&author, &target, format::action_text(&text)).await;
            }
            IrcEvent::Invite { channel, from } => self.handle_invite(&channel, &from).await,
            IrcEvent::Error(e) => {
                self.diag.error(&format!("Received error event from IRC: {}", e));
            }
        }
    }

    pub async fn handle_discord_event(&mut self, event: DiscordEvent) {
        match event {
            DiscordEvent::Ready { user } => {
                self.diag.debug(&format!(
                    "Connected to Discord as {} ({})",
                    user.username, user.id
                ));
                self.directory.remember_user(&user);
                self.discord_user_id = Some(user.id);
                self.discord_state = LegState::Live;
            }
            DiscordEvent::GuildAvailable(guild) => {
                self.diag.debug(&format!(
                    "Guild available: {} ({} channels)",
                    guild.id,
                    guild.channels.len()
                ));
                self.directory.apply_guild(&guild);
            }
            DiscordEvent::ChannelUpdated(channel) => {
                self.directory.upsert_channel(None, &channel);
            }
            DiscordEvent::Message(message) => self.send_to_irc(message).await,
            DiscordEvent::Error(e) => {
                self.diag.error(&format!("Received error event from Discord: {}", e));
            }
        }
    }

    /// Join an invited channel only when it is part of the bridge set.
    async fn handle_invite(&self, channel: &str, from: &str) {
        self.diag.debug(&format!("Received invite: {} from {}", channel, from));
        if !self.mapping.is_bridged_irc_channel(channel) {
            self.diag.debug(&format!("Channel not found in config, not joining: {}", channel));
            return;
        }
        if let Err(e) = self.irc.join(channel).await {
            self.diag.error(&format!("joining {} failed: {}", channel, e));
            return;
        }
        self.diag.debug(&format!("Joining channel: {}", channel));
    }

    /// Discord -> IRC.
    async fn send_to_irc(&mut self, message: DiscordMessage) {
        self.directory.remember_user(&message.author);
        for user in &message.mentions {
            self.directory.remember_user(user);
        }

        if !self.is_live() {
            self.diag.debug("Dropping Discord message, bridge not live yet");
            return;
        }
        if self.discord_user_id.as_deref() == Some(message.author.id.as_str()) {
            return;
        }
        let Some(guild_id) = message.guild_id.as_deref() else {
            self.diag.debug("Ignoring direct message from Discord");
            return;
        };
        let Some(channel_name) = self.directory.channel_name(&message.channel_id) else {
            self.diag.debug(&format!(
                "Unknown Discord channel {}, not relaying",
                message.channel_id
            ));
            return;
        };
        let channel_key = mapping::discord_channel_key(guild_id, channel_name);
        let Some(irc_channel) = self.mapping.irc_target(&channel_key) else {
            self.diag.debug(&format!("Channel Mapping {} unmapped", channel_key));
            return;
        };

        let relay = RelayMessage::from_discord(&message, channel_key, &self.directory);
        let text = format::to_irc_text(&relay);
        let author = relay.author_name.as_str();

        if self.commands.is_command(&text) {
            self.say(irc_channel, &CommandGate::preamble(author)).await;
            self.say(irc_channel, &text).await;
            return;
        }

        let display = format::irc_author(author, self.nick_color);
        if !text.is_empty() {
            let line = format!("{} {}", display, text);
            self.diag.debug(&format!("Sending message to IRC {} {}", irc_channel, line));
            self.say(irc_channel, &line).await;
        }
        for url in &relay.attachments {
            let line = format!("{} {}", display, url);
            self.diag.debug(&format!("Sending attachment URL to IRC {} {}", irc_channel, line));
            self.say(irc_channel, &line).await;
        }
    }

    /// IRC -> Discord. `text` already carries notice/action decoration.
    async fn send_to_discord(&self, author: &str, channel: &str, text: String) {
        if !self.is_live() {
            self.diag.debug("Dropping IRC message, bridge not live yet");
            return;
        }
        if author.eq_ignore_ascii_case(&self.irc_nick) {
            return;
        }
        let Some(discord_key) = self.mapping.discord_target(channel) else {
            self.diag.debug(&format!("No Discord channel mapped for {}", channel));
            return;
        };
        let Some((guild_id, channel_name)) = mapping::split_discord_channel_key(discord_key)
        else {
            self.diag.error(&format!("Malformed Discord channel key {}", discord_key));
            return;
        };
        let Some(channel_id) = self.directory.find_text_channel(guild_id, channel_name) else {
            self.diag.info(&format!(
                "Tried to send a message to a channel the bot isn't in: {}",
                discord_key
            ));
            return;
        };

        let relay = RelayMessage::from_irc(author, channel, text);
        let with_mentions = format::expand_mentions(&relay.text, |name| {
            self.directory.user_id_by_name(name).map(str::to_string)
        });
        let line = format::discord_line(&relay.author_name, &with_mentions);
        self.diag.debug(&format!(
            "Sending message to Discord {} {} -> {}",
            line, channel, discord_key
        ));
        if let Err(e) = self.discord.send_message(channel_id, &line).await {
            self.diag.error(&format!("sending to Discord {} failed: {}", discord_key, e));
        }
    }

    async fn say(&self, target: &str, text: &str) {
        if let Err(e) = self.irc.say(target, text).await {
            self.diag.error(&format!("sending to IRC {} failed: {}", target, e));
        }
    }
}
