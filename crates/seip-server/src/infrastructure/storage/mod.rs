//! Storage infrastructure: configuration loading.
//!
//! The `config` sub-module turns the single configuration string handed to
//! `init` (a file path or inline JSON) into a validated `ServerConfig`.

pub mod config;
