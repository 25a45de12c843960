pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod pattern;
pub mod script;
