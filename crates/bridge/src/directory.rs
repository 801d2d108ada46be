//! Snapshot of the Discord guilds the bot can see: channels by id, text channels by name,
//! and user ids by username. Fed from gateway events; read by the formatter and relay.

use crate::channels::{DiscordChannel, DiscordGuild, DiscordUser};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct ChannelEntry {
    guild_id: String,
    name: String,
    text: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordDirectory {
    channels: HashMap<String, ChannelEntry>,
    users: HashMap<String, String>,
}

impl DiscordDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every channel and member of a guild.
    pub fn apply_guild(&mut self, guild: &DiscordGuild) {
        for channel in &guild.channels {
            self.upsert_channel(Some(&guild.id), channel);
        }
        for user in guild.members.iter().filter_map(|m| m.user.as_ref()) {
            self.remember_user(user);
        }
    }

    /// Insert or rename a channel. Channels without a guild or a name are ignored.
    pub fn upsert_channel(&mut self, guild_id: Option<&str>, channel: &DiscordChannel) {
        let guild_id = guild_id.or(channel.guild_id.as_deref());
        let (Some(guild_id), Some(name)) = (guild_id, channel.name.as_deref()) else {
            return;
        };
        self.channels.insert(
            channel.id.clone(),
            ChannelEntry {
                guild_id: guild_id.to_string(),
                name: name.to_string(),
                text: channel.is_text(),
            },
        );
    }

    pub fn remember_user(&mut self, user: &DiscordUser) {
        self.users.insert(user.username.clone(), user.id.clone());
    }

    pub fn channel_name(&self, channel_id: &str) -> Option<&str> {
        self.channels.get(channel_id).map(|c| c.name.as_str())
    }

    /// Text channel id in a guild by name (case-insensitive).
    pub fn find_text_channel(&self, guild_id: &str, name: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|(_, c)| c.text && c.guild_id == guild_id && c.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| id.as_str())
    }

    /// User id by exact username.
    pub fn user_id_by_name(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(String::as_str)
    }
}
