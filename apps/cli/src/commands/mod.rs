//! Command implementations for the Shield CLI.

pub mod config;
pub mod fetch;
pub mod inspect;
pub mod prepare;
pub mod sources;
pub mod train;
pub mod types;
