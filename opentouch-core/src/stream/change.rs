//! Frame-level change detection between consecutive captures.
//!
//! Compares each new frame against the last *emitted* frame using the
//! mean absolute colour difference. Frames below the threshold count as
//! identical and are skipped, but only up to `skip_cap` times in a row so
//! that a static screen is still refreshed periodically.

use crate::stream::types::RawFrame;

/// Default normalized difference below which two frames are identical.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.02;

/// Default number of consecutive identical frames that may be skipped.
pub const DEFAULT_SKIP_CAP: u32 = 5;

// ── Verdict ──────────────────────────────────────────────────────

/// Outcome of comparing a frame against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No baseline yet, geometry changed, or the difference crossed the threshold.
    Changed,
    /// Identical to the baseline, but the skip cap was reached.
    Refresh,
    /// Identical to the baseline; do not send.
    Skip,
}

impl Verdict {
    /// Whether the frame should be encoded and sent.
    pub fn should_emit(self) -> bool {
        !matches!(self, Verdict::Skip)
    }
}

// ── ChangeDetector ───────────────────────────────────────────────

/// Stateful detector that remembers the last emitted frame.
///
/// Call [`check`](Self::check) for every captured frame and
/// [`commit`](Self::commit) for every frame that was actually sent.
pub struct ChangeDetector {
    baseline: Option<RawFrame>,
    threshold: f64,
    skip_cap: u32,
    skipped: u32,
}

impl ChangeDetector {
    /// Create a detector with an explicit threshold and skip cap.
    pub fn new(threshold: f64, skip_cap: u32) -> Self {
        Self {
            baseline: None,
            threshold: threshold.clamp(0.0, 1.0),
            skip_cap,
            skipped: 0,
        }
    }

    /// Consecutive identical frames skipped since the last emit.
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Classify `frame` against the baseline.
    pub fn check(&mut self, frame: &RawFrame) -> Verdict {
        let Some(baseline) = &self.baseline else {
            return Verdict::Changed;
        };

        if mean_abs_diff(baseline, frame) >= self.threshold {
            return Verdict::Changed;
        }

        self.skipped += 1;
        if self.skipped < self.skip_cap {
            Verdict::Skip
        } else {
            Verdict::Refresh
        }
    }

    /// Record `frame` as emitted: it becomes the new baseline.
    pub fn commit(&mut self, frame: RawFrame) {
        self.baseline = Some(frame);
        self.skipped = 0;
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_THRESHOLD, DEFAULT_SKIP_CAP)
    }
}

/// Mean absolute per-channel difference between two frames, in `[0, 1]`.
///
/// Alpha and row padding are ignored. Frames with different geometry
/// are maximally different.
pub fn mean_abs_diff(a: &RawFrame, b: &RawFrame) -> f64 {
    if !a.same_geometry(b) || a.validate().is_err() || b.validate().is_err() {
        return 1.0;
    }

    let bpp = a.format.bytes_per_pixel();
    let offsets = a.format.rgb_offsets();
    let mut total: u64 = 0;

    for y in 0..a.height {
        let (row_a, row_b) = (a.row(y), b.row(y));
        for (pa, pb) in row_a.chunks_exact(bpp).zip(row_b.chunks_exact(bpp)) {
            for &c in &offsets {
                total += pa[c].abs_diff(pb[c]) as u64;
            }
        }
    }

    let samples = a.width as u64 * a.height as u64 * offsets.len() as u64;
    total as f64 / (samples as f64 * 255.0)
}
