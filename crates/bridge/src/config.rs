//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.discord-irc/config.json`). The file holds either a
//! single bot object or an array of them; every entry becomes one independent bridge session.
//! Entries are validated up front so no connection is attempted with a broken config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::mapping;

/// Fatal configuration problems, reported before any network connection is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration field {0}")]
    MissingField(&'static str),
    #[error("invalid channel mapping given")]
    InvalidChannelMapping,
    #[error("irc channel {irc} is mapped from both {first} and {second}")]
    DuplicateIrcChannel {
        irc: String,
        first: String,
        second: String,
    },
    #[error("config must be a bot object or an array of bot objects")]
    InvalidShape,
}

/// One bot entry as written in the config file. Validated into [`BotConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBotConfig {
    /// IRC server hostname.
    pub server: Option<String>,
    /// Bot nickname on IRC.
    pub nickname: Option<String>,
    /// Discord `"<guildId>,#<channel>"` -> `"#ircchannel [key]"`. Kept as raw JSON so a
    /// malformed shape is reported as a configuration error rather than a parse error.
    pub channel_mapping: Option<serde_json::Value>,
    /// Discord bot token. Falls back to DISCORD_TOKEN env when absent.
    pub discord_token: Option<String>,
    #[serde(default)]
    pub command_characters: Vec<char>,
    /// Colorize Discord nicknames on IRC (default true).
    pub irc_nick_color: Option<bool>,
    /// Raw IRC commands sent after every successful registration,
    /// e.g. `["PRIVMSG", "NickServ", "IDENTIFY pw"]`.
    #[serde(default)]
    pub auto_send_commands: Vec<Vec<String>>,
    #[serde(default)]
    pub irc_options: IrcOptions,
}

/// IRC transport tuning, passed through to the IRC connector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrcOptions {
    #[serde(default = "default_irc_port")]
    pub port: u16,
    /// USER name (default: nickname).
    pub user_name: Option<String>,
    /// Real name / gecos (default: nickname).
    pub real_name: Option<String>,
    #[serde(default = "default_true")]
    pub flood_protection: bool,
    /// Minimum delay between outbound lines in milliseconds when flood protection is on.
    #[serde(default = "default_flood_protection_delay")]
    pub flood_protection_delay: u64,
    /// Reconnect attempts after a dropped connection before giving up.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Options this connector does not understand; accepted and ignored.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

fn default_irc_port() -> u16 {
    6667
}

fn default_true() -> bool {
    true
}

fn default_flood_protection_delay() -> u64 {
    500
}

fn default_retry_count() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    2000
}

impl Default for IrcOptions {
    fn default() -> Self {
        Self {
            port: default_irc_port(),
            user_name: None,
            real_name: None,
            flood_protection: true,
            flood_protection_delay: default_flood_protection_delay(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            other: BTreeMap::new(),
        }
    }
}

/// Validated configuration for one bridge pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub server: String,
    pub nickname: String,
    /// Discord channel key -> raw IRC channel value (may still carry a channel key).
    pub channel_mapping: BTreeMap<String, String>,
    pub discord_token: String,
    pub command_characters: Vec<char>,
    pub irc_nick_color: bool,
    pub auto_send_commands: Vec<Vec<String>>,
    pub irc_options: IrcOptions,
}

impl BotConfig {
    /// Validate a raw entry. Required fields are checked in order: server, nickname,
    /// channelMapping, discordToken.
    pub fn from_raw(raw: RawBotConfig) -> Result<Self, ConfigError> {
        let server = required(raw.server, "server")?;
        let nickname = required(raw.nickname, "nickname")?;
        let mapping_value = raw
            .channel_mapping
            .ok_or(ConfigError::MissingField("channelMapping"))?;
        let channel_mapping = parse_channel_mapping(&mapping_value)?;
        let discord_token = required(raw.discord_token, "discordToken")?;

        Ok(Self {
            server,
            nickname,
            channel_mapping,
            discord_token,
            command_characters: raw.command_characters,
            irc_nick_color: raw.irc_nick_color.unwrap_or(true),
            auto_send_commands: raw
                .auto_send_commands
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect(),
            irc_options: raw.irc_options,
        })
    }

    /// IRC channels to join on registration, keys included (e.g. `"#private hunter2"`).
    pub fn irc_join_list(&self) -> Vec<String> {
        self.channel_mapping
            .values()
            .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingField(field))
}

/// The mapping must be a non-empty object of string values, and no two Discord channels may
/// share an IRC channel (the reverse lookup could only keep one of them).
fn parse_channel_mapping(
    value: &serde_json::Value,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let obj = value.as_object().ok_or(ConfigError::InvalidChannelMapping)?;
    if obj.is_empty() {
        return Err(ConfigError::InvalidChannelMapping);
    }
    let mut out = BTreeMap::new();
    let mut seen: HashMap<String, String> = HashMap::new();
    for (discord, irc) in obj {
        let irc = irc.as_str().ok_or(ConfigError::InvalidChannelMapping)?;
        let name = mapping::irc_channel_name(irc).ok_or(ConfigError::InvalidChannelMapping)?;
        if let Some(first) = seen.insert(name.clone(), discord.clone()) {
            return Err(ConfigError::DuplicateIrcChannel {
                irc: name,
                first,
                second: discord.clone(),
            });
        }
        out.insert(discord.clone(), irc.to_string());
    }
    Ok(out)
}

/// Split a config document into its bot entries (single object or array).
pub fn parse_config(value: serde_json::Value) -> Result<Vec<RawBotConfig>> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).with_context(|| format!("parsing bot entry {}", i))
            })
            .collect(),
        obj @ serde_json::Value::Object(_) => {
            Ok(vec![serde_json::from_value(obj).context("parsing bot entry")?])
        }
        _ => Err(ConfigError::InvalidShape.into()),
    }
}

/// Resolve the Discord token: config value when set, otherwise env DISCORD_TOKEN.
pub fn resolve_discord_token(raw: &RawBotConfig) -> Option<String> {
    raw.discord_token
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            std::env::var("DISCORD_TOKEN")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DISCORD_IRC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".discord-irc").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load and validate every bot entry from the given path (or the default path).
/// Returns the configs and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Vec<BotConfig>, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&s)
        .with_context(|| format!("parsing config from {}", path.display()))?;
    let mut configs = Vec::new();
    for (i, mut raw) in parse_config(value)?.into_iter().enumerate() {
        raw.discord_token = resolve_discord_token(&raw);
        if !raw.irc_options.other.is_empty() {
            log::debug!(
                "bot entry {}: ignoring unsupported ircOptions {:?}",
                i,
                raw.irc_options.other.keys().collect::<Vec<_>>()
            );
        }
        let config = BotConfig::from_raw(raw)
            .with_context(|| format!("invalid bot entry {} in {}", i, path.display()))?;
        configs.push(config);
    }
    if configs.is_empty() {
        anyhow::bail!("no bots configured in {}", path.display());
    }
    Ok((configs, path))
}
