//! # opentouch-core
//!
//! Real-time adaptive screen streaming and remote input for OpenTouch.
//!
//! This crate contains:
//! - **Stream**: capture loop, change detection, JPEG encoding, quality
//!   control, frame broadcasting and the input router (`stream`)
//! - **Session**: per-client records and the `SessionHub` that starts and
//!   stops capture as clients come and go (`session`)
//! - **Protocol**: JSON control messages exchanged with the browser client
//! - **Error**: `StreamError`, a typed `thiserror`-based error enum

pub mod error;
pub mod protocol;
pub mod session;
pub mod stream;

mod sync;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::StreamError;
pub use protocol::{ClientMessage, ServerMessage, Viewport};
pub use session::{ConnectedInfo, HubConfig, LatencyReport, SessionHub, SessionId};
pub use stream::{
    Broadcaster, CaptureConfig, CaptureLoop, DesktopGeometry, DxgiCapturer, EncodedFrame,
    FrameEncoder, FrameSource, InjectionSink, InputEvent, InputInjector, InputRouter,
    JpegEncoder, Key, MouseButton, PixelFormat, QualityConfig, QualityController, RawFrame,
    RouterConfig, SourceFactory, enable_dpi_awareness,
};
