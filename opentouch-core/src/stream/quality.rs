//! Latency-driven quality controller.
//!
//! Keeps the most recent round-trip samples in a ring window and maps
//! their mean onto one of three quality targets (boost, base, reduce).
//! A new target is only committed when it differs from the current
//! quality by more than the hysteresis margin.

use std::collections::VecDeque;

// ── QualityConfig ────────────────────────────────────────────────

/// Tuning knobs for [`QualityController`].
#[derive(Debug, Clone, PartialEq)]
pub struct QualityConfig {
    /// Quality used when latency is in the normal band.
    pub base: f64,
    /// Lower bound for any committed quality.
    pub min: f64,
    /// Upper bound for any committed quality.
    pub max: f64,
    /// Number of samples kept in the ring window.
    pub window: usize,
    /// Samples required before the controller acts.
    pub min_samples: usize,
    /// Mean latency (ms) below which quality is boosted.
    pub low_latency_ms: f64,
    /// Mean latency (ms) above which quality is reduced.
    pub high_latency_ms: f64,
    /// Minimum change required to commit a new quality.
    pub hysteresis: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            base: 0.85,
            min: 0.4,
            max: 1.0,
            window: 10,
            min_samples: 3,
            low_latency_ms: 50.0,
            high_latency_ms: 200.0,
            hysteresis: 0.05,
        }
    }
}

const BOOST_STEP: f64 = 0.1;
const REDUCE_STEP: f64 = 0.2;

// ── QualityController ────────────────────────────────────────────

/// Discrete, asymmetric, hysteretic quality controller.
pub struct QualityController {
    config: QualityConfig,
    samples: VecDeque<f64>,
    current: f64,
}

impl QualityController {
    /// Create a controller starting at the configured base quality.
    pub fn new(config: QualityConfig) -> Self {
        let window = config.window.max(1);
        let current = config.base.clamp(config.min, config.max);
        Self {
            samples: VecDeque::with_capacity(window),
            config: QualityConfig { window, ..config },
            current,
        }
    }

    /// Ingest one round-trip sample in milliseconds.
    ///
    /// Returns the new quality if this sample caused a change.
    pub fn record_latency(&mut self, ms: f64) -> Option<f64> {
        if !ms.is_finite() || ms < 0.0 {
            return None;
        }

        if self.samples.len() == self.config.window {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);

        if self.samples.len() < self.config.min_samples {
            return None;
        }

        let target = self.target_for(self.mean_latency()?);
        if (target - self.current).abs() > self.config.hysteresis {
            self.current = target;
            Some(target)
        } else {
            None
        }
    }

    /// Current target quality in `[min, max]`.
    pub fn quality(&self) -> f64 {
        self.current
    }

    /// Current quality on the encoder's 1..=100 scale.
    pub fn quality_percent(&self) -> u8 {
        (self.current * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Mean of the samples currently in the window.
    pub fn mean_latency(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Number of samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    // ── Internal ─────────────────────────────────────────────────

    fn target_for(&self, mean_ms: f64) -> f64 {
        let c = &self.config;
        let target = if mean_ms < c.low_latency_ms {
            (c.base + BOOST_STEP).min(c.max)
        } else if mean_ms > c.high_latency_ms {
            (c.base - REDUCE_STEP).max(c.min)
        } else {
            c.base
        };
        target.clamp(c.min, c.max)
    }
}

impl Default for QualityController {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
