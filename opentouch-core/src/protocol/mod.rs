//! Control messages exchanged with the browser client.
//!
//! # Wire Protocol
//!
//! Control traffic is JSON text, one message per WebSocket text frame,
//! shaped `{"event": <name>, "data": {...}}`. Encoded screen frames are
//! sent as raw binary WebSocket frames and carry no envelope.
//!
//! ```text
//! Client ──[viewport{width,height}]──────────► Server
//! Client ──[input{type,...}]─────────────────► Server
//! Client ──[pong{ts}]────────────────────────► Server
//!
//! Server ──[connected{desktop_size,quality}]─► Client   (once, on open)
//! Server ──[ping{ts}]────────────────────────► Client   (periodic)
//! Server ──[latency{ms,quality}]─────────────► Client   (per accepted pong)
//! Server ──[binary JPEG]─────────────────────► Client   (repeated)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::stream::InputEvent;

// ── Client → Server ──────────────────────────────────────────────

/// Client viewport in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    #[serde(default = "default_viewport_width")]
    pub width: u32,
    #[serde(default = "default_viewport_height")]
    pub height: u32,
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: default_viewport_width(),
            height: default_viewport_height(),
        }
    }
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    Viewport(Viewport),
    Input(InputEvent),
    /// Echo of a server `ping`.
    Pong { ts: u64 },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Server → Client ──────────────────────────────────────────────

/// Messages the server sends as text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once after a successful connect.
    Connected {
        /// Native desktop `[width, height]`.
        desktop_size: [u32; 2],
        /// Current encode quality, 1..=100.
        quality: u8,
    },
    /// Latency probe; `ts` is milliseconds since the server epoch.
    Ping { ts: u64 },
    /// Result of an accepted probe.
    Latency { ms: f64, quality: u8 },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────
