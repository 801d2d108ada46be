//! Discord <-> IRC relay library: config, channel mapping, text formatting,
//! the per-bridge relay session, and the network connectors it drives.

pub mod channels;
pub mod color;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod directory;
pub mod format;
pub mod mapping;
pub mod message;
pub mod relay;
pub mod runner;
