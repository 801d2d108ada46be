//! Command detection for Discord text relayed to IRC.
//!
//! Text starting with a configured command character is forwarded verbatim after a separate
//! attribution line, so IRC bots see the exact command.

#[derive(Debug, Clone, Default)]
pub struct CommandGate {
    prefixes: Vec<char>,
}

impl CommandGate {
    pub fn new(prefixes: &[char]) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
        }
    }

    /// True iff the first character of `text` is a command character.
    pub fn is_command(&self, text: &str) -> bool {
        text.chars()
            .next()
            .is_some_and(|c| self.prefixes.contains(&c))
    }

    /// Attribution line sent before a relayed command.
    pub fn preamble(author: &str) -> String {
        format!("Command sent from Discord by {}:", author)
    }
}
