//! Discord channel <-> IRC channel lookup, built once from the validated config.
//!
//! Discord channels are keyed as `"<guildId>,#<channelName>"`. IRC channel names are stored
//! lower-cased with any channel key stripped, so `"#Bridge hunter2"` becomes `"#bridge"`.

use std::collections::{BTreeMap, HashMap};

/// IRC channel name from a mapping value: first whitespace token, lower-cased.
pub fn irc_channel_name(value: &str) -> Option<String> {
    value.split_whitespace().next().map(str::to_lowercase)
}

/// Composite Discord channel key for a guild channel.
pub fn discord_channel_key(guild_id: &str, channel_name: &str) -> String {
    format!("{},#{}", guild_id, channel_name)
}

/// Split a Discord channel key into guild id and channel name (without `#`).
pub fn split_discord_channel_key(key: &str) -> Option<(&str, &str)> {
    let (guild, channel) = key.split_once(',')?;
    let channel = channel.strip_prefix('#').unwrap_or(channel);
    if guild.is_empty() || channel.is_empty() {
        return None;
    }
    Some((guild, channel))
}

/// Immutable bidirectional channel lookup.
#[derive(Debug, Clone, Default)]
pub struct ChannelMapping {
    /// Discord channel key -> IRC channel name.
    to_irc: HashMap<String, String>,
    /// IRC channel name -> Discord channel key.
    to_discord: HashMap<String, String>,
}

impl ChannelMapping {
    /// Build from Discord key -> raw IRC value. Assumes validated input; if two keys share an
    /// IRC channel anyway, the reverse entry of the last key (in key order) wins.
    pub fn build(raw: &BTreeMap<String, String>) -> Self {
        let mut to_irc = HashMap::new();
        let mut to_discord = HashMap::new();
        for (discord, value) in raw {
            let Some(irc) = irc_channel_name(value) else {
                continue;
            };
            to_discord.insert(irc.clone(), discord.clone());
            to_irc.insert(discord.clone(), irc);
        }
        Self { to_irc, to_discord }
    }

    /// IRC channel bridged to a Discord channel key.
    pub fn irc_target(&self, discord_key: &str) -> Option<&str> {
        self.to_irc.get(discord_key).map(String::as_str)
    }

    /// Discord channel key bridged to an IRC channel (case-insensitive).
    pub fn discord_target(&self, irc_channel: &str) -> Option<&str> {
        self.to_discord
            .get(&irc_channel.to_lowercase())
            .map(String::as_str)
    }

    pub fn is_bridged_irc_channel(&self, irc_channel: &str) -> bool {
        self.discord_target(irc_channel).is_some()
    }

    /// (Discord key, IRC channel) pairs, sorted by Discord key.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .to_irc
            .iter()
            .map(|(d, i)| (d.as_str(), i.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}
