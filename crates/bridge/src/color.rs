//! Deterministic IRC nick colors for Discord authors.

/// mIRC colors used for nicknames, in assignment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickColor {
    LightBlue,
    DarkBlue,
    LightRed,
    DarkRed,
    LightGreen,
    DarkGreen,
    Magenta,
    LightMagenta,
    Orange,
    Yellow,
    Cyan,
    LightCyan,
}

pub const NICK_COLORS: [NickColor; 12] = [
    NickColor::LightBlue,
    NickColor::DarkBlue,
    NickColor::LightRed,
    NickColor::DarkRed,
    NickColor::LightGreen,
    NickColor::DarkGreen,
    NickColor::Magenta,
    NickColor::LightMagenta,
    NickColor::Orange,
    NickColor::Yellow,
    NickColor::Cyan,
    NickColor::LightCyan,
];

const COLOR_START: char = '\u{3}';
const RESET: char = '\u{f}';

impl NickColor {
    /// Two-digit mIRC color code.
    pub fn code(self) -> &'static str {
        match self {
            NickColor::LightBlue => "12",
            NickColor::DarkBlue => "02",
            NickColor::LightRed => "04",
            NickColor::DarkRed => "05",
            NickColor::LightGreen => "09",
            NickColor::DarkGreen => "03",
            NickColor::Magenta => "06",
            NickColor::LightMagenta => "13",
            NickColor::Orange => "07",
            NickColor::Yellow => "08",
            NickColor::Cyan => "10",
            NickColor::LightCyan => "11",
        }
    }
}

/// Color for a display name: (first UTF-16 code unit + UTF-16 length) mod palette size.
pub fn color_for(name: &str) -> NickColor {
    let first = name.encode_utf16().next().map(usize::from).unwrap_or(0);
    let len = name.encode_utf16().count();
    NICK_COLORS[(first + len) % NICK_COLORS.len()]
}

/// Wrap text in a color code followed by a formatting reset.
pub fn wrap(color: NickColor, text: &str) -> String {
    format!("{}{}{}{}", COLOR_START, color.code(), text, RESET)
}

pub fn colorize_nick(name: &str) -> String {
    wrap(color_for(name), name)
}
