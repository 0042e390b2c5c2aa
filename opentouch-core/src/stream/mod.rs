//! # Adaptive streaming pipeline
//!
//! Screen frames flow from a capture thread to every connected client;
//! input flows back from the clients to the desktop.
//!
//! ## Architecture
//!
//! ```text
//! CAPTURE THREAD                               TOKIO RUNTIME
//! ┌─────────────────────────┐                ┌──────────────────────────┐
//! │ FrameSource             │                │                          │
//! │   ↓                     │                │                          │
//! │ ChangeDetector          │   Handle::     │ Broadcaster::deliver     │
//! │   ↓                     │   spawn        │   ↓                      │
//! │ FrameEncoder (quality ◄─┼──┐ ────────►   │ per-client mpsc(1)       │
//! │   ↓                     │  │             │   ↓                      │
//! │ Broadcaster::offer      │  │             │ WebSocket writer         │
//! └─────────────────────────┘  │             └──────────────────────────┘
//!                              └── QualityController ◄── ping/pong RTT
//!
//! Input: client ──[InputEvent]──► InputRouter ──► InjectionSink
//! ```
//!
//! ## Sub-modules
//!
//! | Module      | Purpose                                               |
//! |-------------|-------------------------------------------------------|
//! | `types`     | Raw and encoded frame types                           |
//! | `source`    | `FrameSource` trait and DXGI Desktop Duplication      |
//! | `change`    | Mean-difference change detection with a skip cap      |
//! | `encoder`   | `FrameEncoder` trait and JPEG encoder                 |
//! | `capture`   | Dedicated-thread capture loop                         |
//! | `quality`   | Latency-driven quality controller                     |
//! | `broadcast` | Drop-on-busy fan-out into the async runtime           |
//! | `keys`      | Client key-name table                                 |
//! | `router`    | Input state machine and `InjectionSink` trait         |
//! | `inject`    | Win32 `SendInput` injection sink                      |

pub mod broadcast;
pub mod capture;
pub mod change;
pub mod encoder;
pub mod inject;
pub mod keys;
pub mod quality;
pub mod router;
pub mod source;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use broadcast::{Broadcaster, SinkId};
pub use capture::{CaptureConfig, CaptureLoop, CaptureStats};
pub use change::{ChangeDetector, Verdict, mean_abs_diff};
pub use encoder::{FrameEncoder, JpegEncoder};
pub use inject::{InputInjector, enable_dpi_awareness};
pub use keys::{Key, KeyLookup, NamedKey};
pub use quality::{QualityConfig, QualityController};
pub use router::{
    DesktopGeometry, InjectionSink, InputEvent, InputRouter, MouseButton, RouterConfig,
};
pub use source::{DxgiCapturer, FrameSource, SourceFactory};
pub use types::{EncodedFrame, PixelFormat, RawFrame};
