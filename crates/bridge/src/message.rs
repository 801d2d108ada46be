//! Transient per-event message handed through the relay pipeline.

use crate::channels::DiscordMessage;
use crate::directory::DiscordDirectory;
use crate::format;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Discord,
    Irc,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Discord => f.write_str("Discord"),
            Network::Irc => f.write_str("IRC"),
        }
    }
}

/// A structured reference inside the raw text: the placeholder span and the name it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub placeholder: String,
    pub name: String,
}

/// One inbound message, normalized for relaying. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub source: Network,
    /// Discord channel key or IRC channel name.
    pub source_channel: String,
    pub author_name: String,
    pub author_id: String,
    pub text: String,
    pub mentions: Vec<Reference>,
    /// Only references that resolved; unresolved placeholders stay in `text`.
    pub channel_refs: Vec<Reference>,
    pub attachments: Vec<String>,
}

impl RelayMessage {
    pub fn from_discord(
        message: &DiscordMessage,
        channel_key: String,
        directory: &DiscordDirectory,
    ) -> Self {
        let mentions = message
            .mentions
            .iter()
            .flat_map(|user| {
                [format!("<@{}>", user.id), format!("<@!{}>", user.id)]
                    .into_iter()
                    .map(|placeholder| Reference {
                        placeholder,
                        name: user.username.clone(),
                    })
            })
            .collect();
        let channel_refs = format::channel_ref_ids(&message.content)
            .filter_map(|id| {
                directory.channel_name(id).map(|name| Reference {
                    placeholder: format!("<#{}>", id),
                    name: name.to_string(),
                })
            })
            .collect();
        Self {
            source: Network::Discord,
            source_channel: channel_key,
            author_name: message.author.username.clone(),
            author_id: message.author.id.clone(),
            text: message.content.clone(),
            mentions,
            channel_refs,
            attachments: message.attachments.iter().map(|a| a.url.clone()).collect(),
        }
    }

    /// IRC carries no structured references; the nick doubles as author id.
    pub fn from_irc(author: &str, channel: &str, text: String) -> Self {
        Self {
            source: Network::Irc,
            source_channel: channel.to_string(),
            author_name: author.to_string(),
            author_id: author.to_string(),
            text,
            mentions: Vec::new(),
            channel_refs: Vec::new(),
            attachments: Vec::new(),
        }
    }
}
