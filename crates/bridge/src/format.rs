//! Text conversion between Discord and IRC.
//!
//! Discord -> IRC: mention and channel placeholders become `@name` / `#name`, line breaks
//! collapse to spaces (IRC is line-oriented). IRC -> Discord: `@name` words become native
//! mentions when the user is known. Nothing here performs I/O.

use crate::color;
use crate::message::RelayMessage;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static CHANNEL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").expect("hardcoded regex"));
static MENTION_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[^\s]+\b").expect("hardcoded regex"));

/// Ids referenced by `<#id>` channel placeholders, in order of appearance.
pub fn channel_ref_ids(text: &str) -> impl Iterator<Item = &str> + '_ {
    CHANNEL_REF
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Replace `\r\n`, `\r` and `\n` with a single space each.
pub fn collapse_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Plain IRC text for a Discord-originated message.
pub fn to_irc_text(message: &RelayMessage) -> String {
    let mut text = message.text.clone();
    for mention in &message.mentions {
        text = text.replace(&mention.placeholder, &format!("@{}", mention.name));
    }
    let mut text = collapse_line_breaks(&text);
    for channel in &message.channel_refs {
        text = text.replace(&channel.placeholder, &format!("#{}", channel.name));
    }
    text
}

/// Turn `@name` words into `<@id>` mentions for users `lookup` knows; others stay literal.
pub fn expand_mentions<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    MENTION_WORD
        .replace_all(text, |caps: &Captures<'_>| {
            let word = &caps[0];
            match lookup(&word[1..]) {
                Some(id) => format!("<@{}>", id),
                None => word.to_string(),
            }
        })
        .into_owned()
}

/// `<author>` prefix for lines sent to IRC, optionally colorized.
pub fn irc_author(name: &str, colored: bool) -> String {
    if colored {
        format!("<{}>", color::colorize_nick(name))
    } else {
        format!("<{}>", name)
    }
}

/// Line posted to Discord: bold author, then text.
pub fn discord_line(author: &str, text: &str) -> String {
    format!("**<{}>** {}", author, text)
}

pub fn notice_text(text: &str) -> String {
    format!("*{}*", text)
}

pub fn action_text(text: &str) -> String {
    format!("_{}_", text)
}
