//! Subcommand implementations

pub mod bundle;
pub mod manipulate;
pub mod parse;
pub mod scan;
