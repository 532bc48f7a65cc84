//! Subcommand implementations

pub mod detect;
pub mod nodes;
pub mod settings;
