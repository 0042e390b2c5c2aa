//! # opentouch-server
//!
//! Mirrors the local desktop to browser clients over WebSocket and
//! replays their touch, mouse and keyboard input.
//!
//! - **config**: TOML configuration with serde defaults
//! - **http**: health check and browser viewer on the same port
//! - **net**: LAN address discovery and port fallback
//! - **service**: the WebSocket accept loop and per-client tasks

pub mod config;
pub mod http;
pub mod net;
pub mod service;
