//! Per-connection session record.

use crate::protocol::Viewport;

/// Identifies one connected client.
pub type SessionId = u64;

/// State kept for one connected client.
#[derive(Debug, Clone, Default)]
pub struct ClientSession {
    /// Absent until the client reports one; input is ignored until then.
    viewport: Option<Viewport>,
    /// `ts` of the most recent ping sent.
    last_probe_sent: Option<u64>,
    /// `ts` of the most recent pong accepted.
    last_probe_acked: Option<u64>,
    last_rtt_ms: Option<f64>,
}

impl ClientSession {
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn last_rtt_ms(&self) -> Option<f64> {
        self.last_rtt_ms
    }

    /// Stamp a new probe at `now_ms`. Stamps are strictly increasing
    /// per session, so the returned `ts` may run ahead of `now_ms`.
    pub fn probe_sent(&mut self, now_ms: u64) -> u64 {
        let ts = match self.last_probe_sent {
            Some(prev) if prev >= now_ms => prev + 1,
            _ => now_ms,
        };
        self.last_probe_sent = Some(ts);
        ts
    }

    /// Validate a pong and record its round trip.
    ///
    /// A pong is accepted only if it echoes a probe that was sent and is
    /// newer than the last accepted one. Returns the round trip in ms.
    pub fn probe_acked(&mut self, ts: u64, now_ms: u64) -> Option<f64> {
        let sent = self.last_probe_sent?;
        if ts > sent || self.last_probe_acked.is_some_and(|acked| ts <= acked) {
            return None;
        }

        self.last_probe_acked = Some(ts);
        let rtt = now_ms.saturating_sub(ts) as f64;
        self.last_rtt_ms = Some(rtt);
        Some(rtt)
    }
}
