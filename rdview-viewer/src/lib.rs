//! # rdview-viewer: Headless Session Viewer
//!
//! Owns one session display controller: loads the TOML configuration,
//! starts the session against the gateway, logs display and scale
//! changes, and tears everything down on Ctrl-C or a session error.

pub mod config;
