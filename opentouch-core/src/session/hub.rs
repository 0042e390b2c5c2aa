//! The coordinating object shared by every connection.
//!
//! [`SessionHub`] owns the session table, the desktop geometry, the
//! quality controller, the broadcaster, the capture loop and the input
//! router. Transports map their connection events onto its operations.
//!
//! Capture runs only while at least one client is connected: it starts
//! on the 0 → 1 transition of the session count and stops on 1 → 0,
//! at which point every held button and key is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::StreamError;
use crate::protocol::{ServerMessage, Viewport};
use crate::session::client::{ClientSession, SessionId};
use crate::stream::{
    Broadcaster, CaptureConfig, CaptureLoop, CaptureStats, DesktopGeometry, EncodedFrame,
    FrameEncoder, InjectionSink, InputEvent, InputRouter, QualityConfig, QualityController,
    RouterConfig, SourceFactory,
};
use crate::sync::lock;

// ── Configuration ────────────────────────────────────────────────

/// Everything the hub needs to build its pipeline.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub capture: CaptureConfig,
    pub quality: QualityConfig,
    pub router: RouterConfig,
}

// ── Results ──────────────────────────────────────────────────────

/// Returned by a successful [`SessionHub::connect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectedInfo {
    pub desktop_size: (u32, u32),
    pub quality: u8,
}

impl ConnectedInfo {
    pub fn to_message(self) -> ServerMessage {
        ServerMessage::Connected {
            desktop_size: [self.desktop_size.0, self.desktop_size.1],
            quality: self.quality,
        }
    }
}

/// Result of an accepted latency probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyReport {
    pub ms: f64,
    pub quality: u8,
    /// Whether this sample changed the encode quality.
    pub changed: bool,
}

impl LatencyReport {
    pub fn to_message(self) -> ServerMessage {
        ServerMessage::Latency {
            ms: self.ms,
            quality: self.quality,
        }
    }
}

// ── SessionHub ───────────────────────────────────────────────────

/// Shared state and lifecycle transitions for all sessions.
///
/// `connect`, `disconnect` and `input` may block (capture start, input
/// rate limiting, injection); call them from blocking contexts.
pub struct SessionHub {
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
    /// Serializes connect/disconnect so capture transitions never race.
    lifecycle: Mutex<()>,
    next_id: AtomicU64,
    geometry: Arc<DesktopGeometry>,
    quality: Arc<Mutex<QualityController>>,
    broadcaster: Arc<Broadcaster>,
    capture: CaptureLoop,
    router: InputRouter,
    epoch: Instant,
}

impl SessionHub {
    /// Build the pipeline. Frames are delivered on the runtime behind `handle`.
    pub fn new(
        config: HubConfig,
        source: SourceFactory,
        encoder: Arc<dyn FrameEncoder>,
        sink: Arc<dyn InjectionSink>,
        handle: Handle,
    ) -> Arc<Self> {
        let geometry = Arc::new(DesktopGeometry::default());
        let quality = Arc::new(Mutex::new(QualityController::new(config.quality)));

        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            next_id: AtomicU64::new(1),
            broadcaster: Broadcaster::new(handle),
            capture: CaptureLoop::new(config.capture, source, encoder, Arc::clone(&quality)),
            router: InputRouter::new(sink, config.router, Arc::clone(&geometry)),
            geometry,
            quality,
            epoch: Instant::now(),
        })
    }

    /// Allocate a fresh session id.
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Register a session whose frames go to `frames`.
    ///
    /// The first session starts capture and records the source's native
    /// size as the desktop geometry. If capture cannot start, the session
    /// is rolled back and the initialization error is returned.
    pub fn connect(
        &self,
        id: SessionId,
        frames: mpsc::Sender<EncodedFrame>,
    ) -> Result<ConnectedInfo, StreamError> {
        let _transition = lock(&self.lifecycle);

        let first = {
            let mut sessions = lock(&self.sessions);
            sessions.insert(id, ClientSession::default());
            sessions.len() == 1
        };

        if first {
            let broadcaster = Arc::clone(&self.broadcaster);
            if let Err(e) = self.capture.start(move |frame| {
                broadcaster.offer(frame);
            }) {
                lock(&self.sessions).remove(&id);
                return Err(e);
            }
            if let Some((w, h)) = self.capture.dimensions() {
                self.router.set_desktop_size(w, h);
            }
            if let Some((x, y)) = self.capture.origin() {
                self.router.set_desktop_origin(x, y);
            }
        }

        self.broadcaster.add_sink(id, frames);

        let info = ConnectedInfo {
            desktop_size: self.geometry.get(),
            quality: self.quality_percent(),
        };
        info!(
            session = id,
            clients = self.session_count(),
            width = info.desktop_size.0,
            height = info.desktop_size.1,
            "client connected"
        );
        Ok(info)
    }

    /// Remove a session. The last one out stops capture and releases
    /// all held input. Returns `false` for an unknown id.
    pub fn disconnect(&self, id: SessionId) -> bool {
        let _transition = lock(&self.lifecycle);

        self.broadcaster.remove_sink(id);
        let (removed, remaining) = {
            let mut sessions = lock(&self.sessions);
            (sessions.remove(&id).is_some(), sessions.len())
        };
        if !removed {
            return false;
        }

        info!(session = id, clients = remaining, "client disconnected");

        if remaining == 0 {
            self.capture.stop();
            let released = self.router.release_all();
            info!(released, "last client left, capture stopped");
        }
        true
    }

    // ── Per-session operations ───────────────────────────────────

    /// Record the viewport a client reported.
    pub fn set_viewport(&self, id: SessionId, viewport: Viewport) -> Result<(), StreamError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&id)
            .ok_or(StreamError::UnknownSession(id))?;
        session.set_viewport(viewport);
        debug!(session = id, width = viewport.width, height = viewport.height, "viewport");
        Ok(())
    }

    pub fn viewport(&self, id: SessionId) -> Option<Viewport> {
        lock(&self.sessions).get(&id).and_then(ClientSession::viewport)
    }

    /// Route one input event from `id` against its viewport.
    ///
    /// Returns `Ok(false)` if the client has not reported a viewport yet.
    pub fn input(&self, id: SessionId, event: &InputEvent) -> Result<bool, StreamError> {
        let viewport = {
            let sessions = lock(&self.sessions);
            let session = sessions.get(&id).ok_or(StreamError::UnknownSession(id))?;
            session.viewport()
        };

        let Some(viewport) = viewport else {
            debug!(session = id, "input before viewport ignored");
            return Ok(false);
        };

        self.router
            .process_event(event, viewport.width, viewport.height);
        Ok(true)
    }

    // ── Latency probing ──────────────────────────────────────────

    /// Milliseconds since this hub was created; the probe clock.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Stamp a new probe for `id`. Returns the `ts` to send, or `None`
    /// if the session is gone.
    pub fn begin_probe(&self, id: SessionId) -> Option<u64> {
        let now = self.now_ms();
        let mut sessions = lock(&self.sessions);
        Some(sessions.get_mut(&id)?.probe_sent(now))
    }

    /// Handle a `pong{ts}` from `id` received now.
    pub fn pong(&self, id: SessionId, ts: u64) -> Option<LatencyReport> {
        self.pong_at(id, ts, self.now_ms())
    }

    /// Handle a `pong{ts}` from `id` received at `now_ms` on the probe clock.
    pub fn pong_at(&self, id: SessionId, ts: u64, now_ms: u64) -> Option<LatencyReport> {
        let rtt = {
            let mut sessions = lock(&self.sessions);
            let accepted = sessions.get_mut(&id)?.probe_acked(ts, now_ms);
            if accepted.is_none() {
                debug!(session = id, ts, "stale or unsolicited pong ignored");
            }
            accepted?
        };

        let mut quality = lock(&self.quality);
        let changed = quality.record_latency(rtt);
        if let Some(q) = changed {
            info!(
                quality = q,
                mean_ms = quality.mean_latency().unwrap_or(rtt),
                "encode quality adjusted"
            );
        }

        Some(LatencyReport {
            ms: rtt,
            quality: quality.quality_percent(),
            changed: changed.is_some(),
        })
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn desktop_size(&self) -> (u32, u32) {
        self.geometry.get()
    }

    pub fn quality_percent(&self) -> u8 {
        lock(&self.quality).quality_percent()
    }

    pub fn last_rtt_ms(&self, id: SessionId) -> Option<f64> {
        lock(&self.sessions).get(&id).and_then(ClientSession::last_rtt_ms)
    }

    pub fn capture_stats(&self) -> Arc<CaptureStats> {
        self.capture.stats()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }
}

// ── Tests ────────────────────────────────────────────────────────
