//! # companion-server: device companion RPC service
//!
//! Listens for call connections over TCP and dispatches every call
//! through the companion gateway. Frame-buffer handoff goes to local
//! endpoints over Unix sockets.
//!
//! Configuration comes from a TOML file (see [`config::CompanionConfig`]);
//! any missing section falls back to its defaults.

pub mod config;
pub mod service;
