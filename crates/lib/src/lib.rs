//! Clawface core library: gateway stream client, chat session state machine and
//! settings, shared by the CLI and desktop applications.

pub mod config;
pub mod gateway;
pub mod session;
