//! Dedicated-thread capture loop.
//!
//! Orchestrates one tick of the pipeline at a time:
//!
//! 1. [`FrameSource`] is polled for the latest raw frame.
//! 2. [`ChangeDetector`] gates near-identical frames.
//! 3. [`FrameEncoder`] compresses at the quality read from the
//!    [`QualityController`] at that moment.
//! 4. The encoded buffer is handed to the `on_frame` callback.
//!
//! Pacing counts from the last *emitted* frame: skipped or missing
//! frames are re-polled after a short sleep, so a change that follows a
//! skip goes out without waiting for another full period.
//!
//! The loop runs on its own OS thread and polls a per-run `running`
//! flag every iteration, so [`stop`](CaptureLoop::stop) takes effect
//! within one tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::stream::change::{ChangeDetector, DEFAULT_CHANGE_THRESHOLD, DEFAULT_SKIP_CAP};
use crate::stream::encoder::FrameEncoder;
use crate::stream::quality::QualityController;
use crate::stream::source::{FrameSource, SourceFactory};
use crate::stream::types::EncodedFrame;
use crate::sync::lock;

// ── CaptureConfig ────────────────────────────────────────────────

/// Configuration for [`CaptureLoop`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target frames per second.
    pub target_fps: u32,
    /// Skip frames that barely differ from the last emitted one.
    pub change_detection: bool,
    /// Normalized mean difference below which frames are identical.
    pub change_threshold: f64,
    /// Consecutive identical frames skipped before a forced refresh.
    pub skip_cap: u32,
    /// Sleep after a failed tick.
    pub error_backoff: Duration,
    /// Sleep while waiting for the next tick or for a frame.
    pub idle_poll: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            change_detection: true,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            skip_cap: DEFAULT_SKIP_CAP,
            error_backoff: Duration::from_millis(10),
            idle_poll: Duration::from_millis(1),
        }
    }
}

impl CaptureConfig {
    /// Length of one tick.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

// ── CaptureStats ─────────────────────────────────────────────────

/// Lifetime counters, shared with the capture thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    emitted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl CaptureStats {
    /// Frames encoded and handed to the callback.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Frames dropped by change detection.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Ticks that failed during capture or encode.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Owner of the capture thread.
///
/// `start` and `stop` are idempotent and safe to call from any thread.
pub struct CaptureLoop {
    config: CaptureConfig,
    factory: SourceFactory,
    encoder: Arc<dyn FrameEncoder>,
    quality: Arc<Mutex<QualityController>>,
    stats: Arc<CaptureStats>,
    state: Mutex<LoopState>,
}

#[derive(Default)]
struct LoopState {
    /// Running flag of the current run, if any.
    running: Option<Arc<AtomicBool>>,
    /// Thread of the current or most recently stopped run.
    handle: Option<JoinHandle<()>>,
    /// Dimensions reported by the current run's source.
    dimensions: Option<(u32, u32)>,
    /// Virtual-desktop origin reported by the current run's source.
    origin: Option<(i32, i32)>,
}

impl CaptureLoop {
    pub fn new(
        config: CaptureConfig,
        factory: SourceFactory,
        encoder: Arc<dyn FrameEncoder>,
        quality: Arc<Mutex<QualityController>>,
    ) -> Self {
        Self {
            config,
            factory,
            encoder,
            quality,
            stats: Arc::new(CaptureStats::default()),
            state: Mutex::new(LoopState::default()),
        }
    }

    /// Start producing frames into `on_frame` until [`stop`](Self::stop).
    ///
    /// Blocks until the frame source has been initialised on the capture
    /// thread; an initialisation failure is returned here. Calling
    /// `start` while running is a no-op.
    pub fn start<F>(&self, on_frame: F) -> Result<(), StreamError>
    where
        F: Fn(EncodedFrame) + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.is_running() {
            return Ok(());
        }

        // A previous run may still be finishing its last tick; only one
        // duplication per output is allowed, so wait for it.
        if let Some(old) = state.handle.take() {
            if old.thread().id() != thread::current().id() {
                let _ = old.join();
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker = Worker {
            config: self.config.clone(),
            encoder: Arc::clone(&self.encoder),
            quality: Arc::clone(&self.quality),
            stats: Arc::clone(&self.stats),
            running: Arc::clone(&running),
        };
        let factory = Arc::clone(&self.factory);

        let handle = thread::Builder::new()
            .name("opentouch-capture".into())
            .spawn(move || worker.run(factory, ready_tx, on_frame))?;

        match ready_rx.recv() {
            Ok(Ok(placement)) => {
                info!(
                    width = placement.dimensions.0,
                    height = placement.dimensions.1,
                    x = placement.origin.0,
                    y = placement.origin.1,
                    fps = self.config.target_fps,
                    "capture started"
                );
                state.running = Some(running);
                state.handle = Some(handle);
                state.dimensions = Some(placement.dimensions);
                state.origin = Some(placement.origin);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(StreamError::CaptureInit(
                    "capture thread exited during initialization".into(),
                ))
            }
        }
    }

    /// Signal the capture thread to stop. Does not wait for it.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(running) = state.running.take() {
            running.store(false, Ordering::Release);
            info!("capture stopped");
        }
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        lock(&self.state).is_running()
    }

    /// Native dimensions of the source of the last successful start.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        lock(&self.state).dimensions
    }

    /// Virtual-desktop origin of the source of the last successful start.
    pub fn origin(&self) -> Option<(i32, i32)> {
        lock(&self.state).origin
    }

    /// Lifetime counters across all runs.
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LoopState {
    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.load(Ordering::Acquire))
    }
}

// ── Worker ───────────────────────────────────────────────────────

/// State moved onto the capture thread.
struct Worker {
    config: CaptureConfig,
    encoder: Arc<dyn FrameEncoder>,
    quality: Arc<Mutex<QualityController>>,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
}

/// Where the source sits on the desktop, reported back to `start`.
struct Placement {
    dimensions: (u32, u32),
    origin: (i32, i32),
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    NoFrame,
    Skipped,
    Emitted,
}

impl Worker {
    fn run<F>(
        self,
        factory: SourceFactory,
        ready: SyncSender<Result<Placement, StreamError>>,
        on_frame: F,
    ) where
        F: Fn(EncodedFrame),
    {
        let mut source = match factory() {
            Ok(source) => {
                let _ = ready.send(Ok(Placement {
                    dimensions: source.dimensions(),
                    origin: source.origin(),
                }));
                source
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        drop(ready);

        let period = self.config.frame_period();
        let mut detector = ChangeDetector::new(self.config.change_threshold, self.config.skip_cap);
        let mut last_emit: Option<Instant> = None;

        while self.running.load(Ordering::Acquire) {
            if last_emit.is_some_and(|t| t.elapsed() < period) {
                thread::sleep(self.config.idle_poll);
                continue;
            }

            let now = Instant::now();
            match self.tick(source.as_mut(), &mut detector, &on_frame) {
                Ok(Tick::Emitted) => last_emit = Some(now),
                Ok(Tick::NoFrame) | Ok(Tick::Skipped) => thread::sleep(self.config.idle_poll),
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("capture tick failed: {e}");
                    thread::sleep(self.config.error_backoff);
                }
            }
        }

        debug!("capture thread exiting");
    }

    fn tick<F>(
        &self,
        source: &mut dyn FrameSource,
        detector: &mut ChangeDetector,
        on_frame: &F,
    ) -> Result<Tick, StreamError>
    where
        F: Fn(EncodedFrame),
    {
        let Some(frame) = source.latest_frame()? else {
            return Ok(Tick::NoFrame);
        };

        if self.config.change_detection && !detector.check(&frame).should_emit() {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(Tick::Skipped);
        }

        let quality = lock(&self.quality).quality_percent();
        let encoded = self.encoder.encode(&frame, quality)?;

        // Stopped while encoding: do not emit after `stop` returned.
        if !self.running.load(Ordering::Acquire) {
            return Ok(Tick::Skipped);
        }

        on_frame(Bytes::from(encoded));
        detector.commit(frame);
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(Tick::Emitted)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::stream::types::{PixelFormat, RawFrame};

    /// Emits a frame whose fill byte is chosen by `fill(n)` for the n-th poll.
    struct ScriptedSource {
        polls: usize,
        fill: fn(usize) -> Option<Result<u8, ()>>,
    }

    impl FrameSource for ScriptedSource {
        fn latest_frame(&mut self) -> Result<Option<RawFrame>, StreamError> {
            let n = self.polls;
            self.polls += 1;
            match (self.fill)(n) {
                None => Ok(None),
                Some(Err(())) => Err(StreamError::Capture("scripted failure".into())),
                Some(Ok(v)) => Ok(Some(RawFrame::packed(8, 8, PixelFormat::Bgra8, vec![v; 256]))),
            }
        }

        fn dimensions(&self) -> (u32, u32) {
            (8, 8)
        }
    }

    /// Returns the quality it was asked for as a one-byte payload.
    struct EchoEncoder;

    impl FrameEncoder for EchoEncoder {
        fn encode(&self, _frame: &RawFrame, quality: u8) -> Result<Vec<u8>, StreamError> {
            Ok(vec![quality])
        }
    }

    fn scripted(fill: fn(usize) -> Option<Result<u8, ()>>) -> (SourceFactory, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory: SourceFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource { polls: 0, fill }) as Box<dyn FrameSource>)
        });
        (factory, created)
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            target_fps: 500,
            ..CaptureConfig::default()
        }
    }

    fn capture_loop(config: CaptureConfig, factory: SourceFactory) -> CaptureLoop {
        CaptureLoop::new(
            config,
            factory,
            Arc::new(EchoEncoder),
            Arc::new(Mutex::new(QualityController::default())),
        )
    }

    fn collector() -> (Arc<Mutex<Vec<Bytes>>>, impl Fn(EncodedFrame) + Send + 'static) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        (frames, move |f| sink.lock().unwrap().push(f))
    }

    #[test]
    fn frame_period_from_fps() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.frame_period().as_millis(), 33);
    }

    #[test]
    fn emits_changing_frames() {
        let (factory, _) = scripted(|n| Some(Ok((n * 40) as u8)));
        let cap = capture_loop(fast_config(), factory);
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        assert!(cap.is_running());
        assert_eq!(cap.dimensions(), Some((8, 8)));
        assert_eq!(cap.origin(), Some((0, 0)));
        thread::sleep(Duration::from_millis(100));
        cap.stop();

        let frames = frames.lock().unwrap();
        assert!(frames.len() >= 3, "only {} frames", frames.len());
        // EchoEncoder reports the quality it was given: the 0.85 base.
        assert!(frames.iter().all(|f| f.as_ref() == [85]));
    }

    #[test]
    fn start_is_idempotent() {
        let (factory, created) = scripted(|_| Some(Ok(1)));
        let cap = capture_loop(fast_config(), factory);

        cap.start(|_| {}).unwrap();
        cap.start(|_| {}).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);

        cap.stop();
        cap.stop();
        assert!(!cap.is_running());
    }

    #[test]
    fn stop_halts_production() {
        let (factory, _) = scripted(|n| Some(Ok(n as u8 * 50)));
        let cap = capture_loop(fast_config(), factory);
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        thread::sleep(Duration::from_millis(50));
        cap.stop();
        thread::sleep(Duration::from_millis(30));
        let after_stop = frames.lock().unwrap().len();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(frames.lock().unwrap().len(), after_stop);
    }

    #[test]
    fn init_failure_is_returned() {
        let factory: SourceFactory =
            Arc::new(|| Err(StreamError::CaptureInit("no monitor".into())));
        let cap = capture_loop(fast_config(), factory);

        let err = cap.start(|_| {}).unwrap_err();
        assert!(matches!(err, StreamError::CaptureInit(_)));
        assert!(!cap.is_running());
    }

    #[test]
    fn tick_errors_do_not_end_the_loop() {
        // Every other poll fails.
        let (factory, _) = scripted(|n| if n % 2 == 0 { Some(Err(())) } else { Some(Ok(n as u8 * 30)) });
        let cap = capture_loop(fast_config(), factory);
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        thread::sleep(Duration::from_millis(150));
        cap.stop();

        assert!(cap.stats().failed() >= 2);
        assert!(!frames.lock().unwrap().is_empty());
    }

    #[test]
    fn static_screen_is_throttled_not_frozen() {
        let (factory, _) = scripted(|_| Some(Ok(0x7F)));
        let cap = capture_loop(fast_config(), factory);
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        thread::sleep(Duration::from_millis(150));
        cap.stop();

        let stats = cap.stats();
        let emitted = frames.lock().unwrap().len() as u64;
        assert!(emitted >= 2, "static screen was never refreshed");
        // At most the first frame plus one in every five afterwards.
        assert!(stats.skipped() >= (emitted - 1) * 4);
    }

    #[test]
    fn missing_frames_are_retried() {
        let (factory, _) = scripted(|n| if n < 5 { None } else { Some(Ok(n as u8)) });
        let cap = capture_loop(fast_config(), factory);
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        thread::sleep(Duration::from_millis(50));
        cap.stop();

        assert!(!frames.lock().unwrap().is_empty());
    }

    #[test]
    fn restart_creates_a_fresh_source() {
        let (factory, created) = scripted(|_| Some(Ok(3)));
        let cap = capture_loop(fast_config(), factory);

        cap.start(|_| {}).unwrap();
        cap.stop();
        cap.start(|_| {}).unwrap();
        assert!(cap.is_running());
        assert_eq!(created.load(Ordering::SeqCst), 2);
        cap.stop();
    }

    /// Serves one fill value until `switch_after`, then another.
    struct SwitchingSource {
        born: Instant,
        switch_after: Duration,
    }

    impl FrameSource for SwitchingSource {
        fn latest_frame(&mut self) -> Result<Option<RawFrame>, StreamError> {
            let fill = if self.born.elapsed() < self.switch_after { 0x10 } else { 0x90 };
            Ok(Some(RawFrame::packed(8, 8, PixelFormat::Bgra8, vec![fill; 256])))
        }

        fn dimensions(&self) -> (u32, u32) {
            (8, 8)
        }
    }

    #[test]
    fn change_after_skip_is_not_held_back_a_period() {
        let factory: SourceFactory = Arc::new(|| {
            Ok(Box::new(SwitchingSource {
                born: Instant::now(),
                switch_after: Duration::from_millis(130),
            }) as Box<dyn FrameSource>)
        });
        let config = CaptureConfig {
            target_fps: 10,
            skip_cap: 1000,
            ..CaptureConfig::default()
        };
        let cap = capture_loop(config, factory);
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);

        let started = Instant::now();
        cap.start(move |_| sink.lock().unwrap().push(started.elapsed())).unwrap();
        thread::sleep(Duration::from_millis(250));
        cap.stop();

        // First frame at once, second as soon as the screen changes at
        // 130 ms; pacing on skipped ticks would push it to 200 ms.
        let stamps = stamps.lock().unwrap();
        assert!(stamps.len() >= 2, "only {} frames", stamps.len());
        assert!(stamps[1] >= Duration::from_millis(100));
        assert!(stamps[1] < Duration::from_millis(185), "second frame at {:?}", stamps[1]);
        assert!(cap.stats().skipped() > 0);
    }

    #[test]
    fn quality_is_read_at_encode_time() {
        let (factory, _) = scripted(|n| Some(Ok((n * 40) as u8)));
        let quality = Arc::new(Mutex::new(QualityController::default()));
        let cap = CaptureLoop::new(fast_config(), factory, Arc::new(EchoEncoder), Arc::clone(&quality));
        let (frames, on_frame) = collector();

        cap.start(on_frame).unwrap();
        thread::sleep(Duration::from_millis(30));
        for _ in 0..3 {
            quality.lock().unwrap().record_latency(500.0);
        }
        thread::sleep(Duration::from_millis(50));
        cap.stop();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.last().map(|f| f[0]), Some(65));
    }
}
