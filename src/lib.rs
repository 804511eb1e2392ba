//! Combat Monitor - real-time combat log monitoring with session detection
//! and webhook relay.

pub mod config;
pub mod display;
pub mod monitor;
pub mod parser;
pub mod server;
pub mod session;
pub mod watcher;
pub mod webhook;
