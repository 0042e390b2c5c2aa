//! Integration tests: full session lifecycle through the hub with a
//! scripted frame source, the real JPEG encoder and a recording
//! injection sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use opentouch_core::stream::{FrameSource, Key};
use opentouch_core::{
    CaptureConfig, ClientMessage, HubConfig, InjectionSink, InputEvent, JpegEncoder, MouseButton,
    PixelFormat, RawFrame, RouterConfig, SessionHub, SourceFactory, StreamError, Viewport,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;

// ── Helpers ──────────────────────────────────────────────────────

/// 1920x1080 is too slow to encode in a test; the source reports the
/// real desktop size but produces small frames.
struct MovingSource {
    tick: u8,
}

impl FrameSource for MovingSource {
    fn latest_frame(&mut self) -> Result<Option<RawFrame>, StreamError> {
        self.tick = self.tick.wrapping_add(37);
        let mut data = Vec::with_capacity(64 * 48 * 4);
        for y in 0..48u32 {
            for x in 0..64u32 {
                data.extend_from_slice(&[x as u8 ^ self.tick, y as u8, self.tick, 255]);
            }
        }
        Ok(Some(RawFrame::packed(64, 48, PixelFormat::Bgra8, data)))
    }

    fn dimensions(&self) -> (u32, u32) {
        (1920, 1080)
    }
}

fn counting_factory() -> (SourceFactory, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let factory: SourceFactory = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MovingSource { tick: 0 }) as Box<dyn FrameSource>)
    });
    (factory, created)
}

#[derive(Debug, Clone, PartialEq)]
enum Injected {
    Move(i32, i32),
    Press(MouseButton),
    Release(MouseButton),
    KeyRelease(Key),
    Other,
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Injected>>);

impl RecordingSink {
    fn log(&self, cmd: Injected) -> Result<(), StreamError> {
        self.0.lock().unwrap().push(cmd);
        Ok(())
    }

    fn commands(&self) -> Vec<Injected> {
        self.0.lock().unwrap().clone()
    }
}

impl InjectionSink for RecordingSink {
    fn move_to(&self, x: i32, y: i32) -> Result<(), StreamError> {
        self.log(Injected::Move(x, y))
    }
    fn press(&self, button: MouseButton) -> Result<(), StreamError> {
        self.log(Injected::Press(button))
    }
    fn release(&self, button: MouseButton) -> Result<(), StreamError> {
        self.log(Injected::Release(button))
    }
    fn click(&self, _button: MouseButton, _count: u32) -> Result<(), StreamError> {
        self.log(Injected::Other)
    }
    fn scroll(&self, _dx: i32, _dy: i32) -> Result<(), StreamError> {
        self.log(Injected::Other)
    }
    fn key_press(&self, _key: Key) -> Result<(), StreamError> {
        self.log(Injected::Other)
    }
    fn key_release(&self, key: Key) -> Result<(), StreamError> {
        self.log(Injected::KeyRelease(key))
    }
}

fn build_hub(factory: SourceFactory) -> (Arc<SessionHub>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let config = HubConfig {
        capture: CaptureConfig {
            target_fps: 60,
            ..CaptureConfig::default()
        },
        router: RouterConfig {
            min_interval: Duration::from_millis(1),
            ..RouterConfig::default()
        },
        ..HubConfig::default()
    };
    let hub = SessionHub::new(
        config,
        factory,
        Arc::new(JpegEncoder::new()),
        Arc::clone(&sink) as Arc<dyn InjectionSink>,
        Handle::current(),
    );
    (hub, sink)
}

async fn connect(hub: &Arc<SessionHub>) -> (u64, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(1);
    let id = hub.next_session_id();
    let hub = Arc::clone(hub);
    tokio::task::spawn_blocking(move || hub.connect(id, tx))
        .await
        .unwrap()
        .unwrap();
    (id, rx)
}

async fn disconnect(hub: &Arc<SessionHub>, id: u64) {
    let hub = Arc::clone(hub);
    tokio::task::spawn_blocking(move || hub.disconnect(id))
        .await
        .unwrap();
}

async fn next_frame(rx: &mut mpsc::Receiver<Bytes>) -> Bytes {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for frame")
        .expect("frame channel closed")
}

// ── Streaming ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_reach_every_client_as_jpeg() {
    let (factory, _) = counting_factory();
    let (hub, _) = build_hub(factory);

    let (a, mut rx_a) = connect(&hub).await;
    let (b, mut rx_b) = connect(&hub).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_frame(rx).await;
        assert_eq!(&frame[..2], &[0xFF, 0xD8], "not a JPEG");
    }

    disconnect(&hub, a).await;
    disconnect(&hub, b).await;
    assert!(!hub.is_capturing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_capture_instance_across_clients() {
    let (factory, created) = counting_factory();
    let (hub, _) = build_hub(factory);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(connect(&hub).await.0);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(hub.is_capturing());

    for id in ids.drain(..2) {
        disconnect(&hub, id).await;
    }
    assert!(hub.is_capturing());

    disconnect(&hub, ids[0]).await;
    assert!(!hub.is_capturing());

    // A new first client starts a fresh run.
    let (id, _rx) = connect(&hub).await;
    assert_eq!(created.load(Ordering::SeqCst), 2);
    disconnect(&hub, id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_client_does_not_starve_others() {
    let (factory, _) = counting_factory();
    let (hub, _) = build_hub(factory);

    // Never read: its one-slot buffer stays full after the first frame.
    let (slow, _stalled) = connect(&hub).await;
    let (fast, mut rx) = connect(&hub).await;

    let started = std::time::Instant::now();
    let mut received = 0;
    while started.elapsed() < Duration::from_secs(1) {
        next_frame(&mut rx).await;
        received += 1;
    }

    // 60 fps target; leave room for slow CI encoders.
    assert!(received >= 10, "fast client got only {received} frames");
    assert!(hub.broadcaster().lagged() > 0);

    disconnect(&hub, slow).await;
    disconnect(&hub, fast).await;
}

// ── Input ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_viewport_centre_maps_to_desktop_centre() {
    let (factory, _) = counting_factory();
    let (hub, sink) = build_hub(factory);
    let (id, _rx) = connect(&hub).await;
    assert_eq!(hub.desktop_size(), (1920, 1080));

    let viewport = ClientMessage::from_json(r#"{"event":"viewport","data":{"width":1280,"height":720}}"#)
        .unwrap();
    let ClientMessage::Viewport(viewport) = viewport else {
        panic!("expected viewport");
    };
    hub.set_viewport(id, viewport).unwrap();

    hub.input(id, &InputEvent::Move { x: 640.0, y: 360.0 }).unwrap();
    assert_eq!(sink.commands(), vec![Injected::Move(960, 540)]);

    disconnect(&hub, id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_disconnect_releases_stuck_input() {
    let (factory, _) = counting_factory();
    let (hub, sink) = build_hub(factory);
    let (a, _rx_a) = connect(&hub).await;
    let (b, _rx_b) = connect(&hub).await;

    hub.set_viewport(a, Viewport::default()).unwrap();
    for event in [
        InputEvent::MouseDown { button: MouseButton::Left },
        InputEvent::MouseDown { button: MouseButton::Left },
        InputEvent::MouseDown { button: MouseButton::Middle },
        InputEvent::KeyDown { key: "Control".into() },
    ] {
        hub.input(a, &event).unwrap();
    }

    let presses = sink
        .commands()
        .iter()
        .filter(|c| matches!(c, Injected::Press(_)))
        .count();
    assert_eq!(presses, 2);

    disconnect(&hub, a).await;
    assert_eq!(hub.router().held_count(), 3);

    disconnect(&hub, b).await;
    assert_eq!(hub.router().held_count(), 0);

    let releases: Vec<_> = sink
        .commands()
        .into_iter()
        .filter(|c| matches!(c, Injected::Release(_) | Injected::KeyRelease(_)))
        .collect();
    assert_eq!(releases.len(), 3);
}

// ── Quality ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latency_probes_drive_quality() {
    let (factory, _) = counting_factory();
    let (hub, _) = build_hub(factory);
    let (id, _rx) = connect(&hub).await;
    assert_eq!(hub.quality_percent(), 85);

    for _ in 0..3 {
        let ts = hub.begin_probe(id).unwrap();
        hub.pong_at(id, ts, ts + 20);
    }
    assert_eq!(hub.quality_percent(), 95);

    for _ in 0..10 {
        let ts = hub.begin_probe(id).unwrap();
        hub.pong_at(id, ts, ts + 450);
    }
    assert_eq!(hub.quality_percent(), 65);

    // Replayed pongs are ignored.
    let ts = hub.begin_probe(id).unwrap();
    assert!(hub.pong_at(id, ts, ts + 10).is_some());
    assert!(hub.pong_at(id, ts, ts + 10).is_none());

    disconnect(&hub, id).await;
}

#[tokio::test]
async fn test_capture_init_failure_is_reported() {
    let factory: SourceFactory = Arc::new(|| Err(StreamError::CaptureInit("no output".into())));
    let (hub, _) = build_hub(factory);
    let (tx, _rx) = mpsc::channel(1);

    let err = hub.connect(1, tx).unwrap_err();
    assert!(err.to_string().contains("no output"));
    assert_eq!(hub.session_count(), 0);
    assert!(!hub.is_capturing());
}
