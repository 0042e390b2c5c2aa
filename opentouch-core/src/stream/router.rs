//! Remote input routing.
//!
//! [`InputRouter`] receives typed pointer and keyboard events from a
//! client together with the client's viewport, maps coordinates into
//! desktop space and forwards discrete commands to an
//! [`InjectionSink`]. Press and release commands are gated on tracked
//! state so duplicated client messages never produce ghost events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::stream::keys::{self, Key, KeyLookup};
use crate::sync::{lock, read, write};

// ── Events ───────────────────────────────────────────────────────

/// Mouse buttons a client may name. Unknown names fail to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// One input event as sent by the client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    /// Pointer position in client viewport pixels.
    Move {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_click_count")]
        count: u32,
    },
    MouseDown {
        #[serde(default)]
        button: MouseButton,
    },
    MouseUp {
        #[serde(default)]
        button: MouseButton,
    },
    Scroll {
        #[serde(default)]
        dx: f64,
        #[serde(default)]
        dy: f64,
    },
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    /// Tap of a single printable character.
    KeyPress {
        key: String,
    },
}

fn default_click_count() -> u32 {
    1
}

// ── InjectionSink ────────────────────────────────────────────────

/// Receiver of synthesized OS input.
///
/// Coordinates are absolute virtual-desktop pixels: the captured
/// output's origin is already added. Scroll deltas are in wheel notches
/// (positive `dy` scrolls up).
pub trait InjectionSink: Send + Sync {
    fn move_to(&self, x: i32, y: i32) -> Result<(), StreamError>;
    fn press(&self, button: MouseButton) -> Result<(), StreamError>;
    fn release(&self, button: MouseButton) -> Result<(), StreamError>;
    fn click(&self, button: MouseButton, count: u32) -> Result<(), StreamError>;
    fn scroll(&self, dx: i32, dy: i32) -> Result<(), StreamError>;
    fn key_press(&self, key: Key) -> Result<(), StreamError>;
    fn key_release(&self, key: Key) -> Result<(), StreamError>;
}

// ── DesktopGeometry ──────────────────────────────────────────────

/// Native size and virtual-desktop origin of the captured output,
/// shared between the hub and the router.
#[derive(Debug)]
pub struct DesktopGeometry(RwLock<Layout>);

#[derive(Debug, Clone, Copy)]
struct Layout {
    size: (u32, u32),
    origin: (i32, i32),
}

impl DesktopGeometry {
    pub const DEFAULT: (u32, u32) = (1920, 1080);

    pub fn new(width: u32, height: u32) -> Self {
        Self(RwLock::new(Layout {
            size: (width, height),
            origin: (0, 0),
        }))
    }

    /// `(width, height)` in pixels.
    pub fn get(&self) -> (u32, u32) {
        read(&self.0).size
    }

    pub fn set(&self, width: u32, height: u32) {
        write(&self.0).size = (width, height);
    }

    /// Top-left corner of the output on the virtual desktop.
    pub fn origin(&self) -> (i32, i32) {
        read(&self.0).origin
    }

    pub fn set_origin(&self, x: i32, y: i32) {
        write(&self.0).origin = (x, y);
    }
}

impl Default for DesktopGeometry {
    fn default() -> Self {
        Self::new(Self::DEFAULT.0, Self::DEFAULT.1)
    }
}

// ── InputRouter ──────────────────────────────────────────────────

/// Configuration for [`InputRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum spacing between two processed events.
    pub min_interval: Duration,
    /// Multiplier applied to both scroll deltas before rounding.
    pub scroll_factor: f64,
    /// Upper bound for a single `click` count.
    pub max_click_count: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5),
            scroll_factor: 1.0,
            max_click_count: 3,
        }
    }
}

#[derive(Default)]
struct RouterState {
    buttons: HashSet<MouseButton>,
    /// Held keys by physical identity, with the key as it was pressed.
    keys: HashMap<Key, Key>,
    last_event: Option<Instant>,
}

/// Input state machine in front of an [`InjectionSink`].
///
/// All methods take `&self`; events are serialized internally. Calls
/// may block for up to `min_interval` and for the duration of the
/// injection itself, so async callers should go through
/// `spawn_blocking`.
pub struct InputRouter {
    sink: Arc<dyn InjectionSink>,
    config: RouterConfig,
    geometry: Arc<DesktopGeometry>,
    state: Mutex<RouterState>,
}

impl InputRouter {
    pub fn new(
        sink: Arc<dyn InjectionSink>,
        config: RouterConfig,
        geometry: Arc<DesktopGeometry>,
    ) -> Self {
        Self {
            sink,
            config,
            geometry,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Set the native desktop size used for coordinate mapping.
    pub fn set_desktop_size(&self, width: u32, height: u32) {
        self.geometry.set(width, height);
    }

    pub fn desktop_size(&self) -> (u32, u32) {
        self.geometry.get()
    }

    /// Set the virtual-desktop position of the captured output.
    pub fn set_desktop_origin(&self, x: i32, y: i32) {
        self.geometry.set_origin(x, y);
    }

    /// Map a viewport position onto the desktop.
    ///
    /// Scales, truncates toward zero and clamps to `[0, dim - 1]`.
    /// Returns `None` if the viewport has a zero dimension.
    pub fn map_coordinates(
        &self,
        x: f64,
        y: f64,
        client_width: u32,
        client_height: u32,
    ) -> Option<(i32, i32)> {
        if client_width == 0 || client_height == 0 {
            return None;
        }
        let (dw, dh) = self.geometry.get();
        Some((
            scale_axis(x, client_width, dw),
            scale_axis(y, client_height, dh),
        ))
    }

    /// Apply one client event.
    pub fn process_event(&self, event: &InputEvent, client_width: u32, client_height: u32) {
        let mut state = lock(&self.state);
        self.rate_limit(&mut state);

        match event {
            InputEvent::Move { x, y } => {
                let Some((px, py)) = self.map_coordinates(*x, *y, client_width, client_height)
                else {
                    debug!(client_width, client_height, "move dropped: empty viewport");
                    return;
                };
                let (ox, oy) = self.geometry.origin();
                report(
                    "move",
                    self.sink.move_to(px.saturating_add(ox), py.saturating_add(oy)),
                );
            }
            InputEvent::Click { button, count } => {
                let count = (*count).min(self.config.max_click_count);
                if count > 0 {
                    report("click", self.sink.click(*button, count));
                }
            }
            InputEvent::MouseDown { button } => {
                if !state.buttons.contains(button) && report("press", self.sink.press(*button)) {
                    state.buttons.insert(*button);
                }
            }
            InputEvent::MouseUp { button } => {
                if state.buttons.remove(button) {
                    report("release", self.sink.release(*button));
                }
            }
            InputEvent::Scroll { dx, dy } => {
                let f = self.config.scroll_factor;
                report(
                    "scroll",
                    self.sink.scroll(wheel_units(*dx * f), wheel_units(*dy * f)),
                );
            }
            InputEvent::KeyDown { key } => {
                let Some(key) = lookup(key, keys::resolve(key)) else {
                    return;
                };
                if !state.keys.contains_key(&key.physical())
                    && report("key press", self.sink.key_press(key))
                {
                    state.keys.insert(key.physical(), key);
                }
            }
            InputEvent::KeyUp { key } => {
                let Some(key) = lookup(key, keys::resolve(key)) else {
                    return;
                };
                // Release what was pressed, even if the case changed since.
                if let Some(pressed) = state.keys.remove(&key.physical()) {
                    report("key release", self.sink.key_release(pressed));
                }
            }
            InputEvent::KeyPress { key } => {
                let Some(key) = lookup(key, keys::resolve_char(key)) else {
                    return;
                };
                if state.keys.contains_key(&key.physical()) {
                    debug!(%key, "keypress dropped: key is held");
                    return;
                }
                if report("key press", self.sink.key_press(key)) {
                    report("key release", self.sink.key_release(key));
                }
            }
        }
    }

    /// Release every held button and key. Returns the number of
    /// releases forwarded to the sink.
    pub fn release_all(&self) -> usize {
        let mut state = lock(&self.state);
        let mut released = 0;

        for button in state.buttons.drain() {
            report("release", self.sink.release(button));
            released += 1;
        }
        for (_, key) in state.keys.drain() {
            report("key release", self.sink.key_release(key));
            released += 1;
        }

        if released > 0 {
            debug!(released, "released all held input");
        }
        released
    }

    pub fn is_pressed(&self, button: MouseButton) -> bool {
        lock(&self.state).buttons.contains(&button)
    }

    pub fn is_key_held(&self, key: Key) -> bool {
        lock(&self.state).keys.contains_key(&key.physical())
    }

    /// Number of buttons plus keys currently held.
    pub fn held_count(&self) -> usize {
        let state = lock(&self.state);
        state.buttons.len() + state.keys.len()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn rate_limit(&self, state: &mut RouterState) {
        if let Some(last) = state.last_event {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_interval {
                thread::sleep(self.config.min_interval - elapsed);
            }
        }
        state.last_event = Some(Instant::now());
    }
}

fn scale_axis(v: f64, client: u32, desktop: u32) -> i32 {
    let max = desktop.max(1) as i64 - 1;
    // `as` saturates and maps NaN to zero.
    let scaled = (v / client as f64 * desktop as f64) as i64;
    scaled.clamp(0, max) as i32
}

fn wheel_units(delta: f64) -> i32 {
    delta.round() as i32
}

fn lookup(name: &str, result: KeyLookup) -> Option<Key> {
    let key = result.found();
    if key.is_none() {
        debug!(name, "unknown key dropped");
    }
    key
}

/// Log an injection failure. Returns whether the command succeeded.
fn report(what: &str, result: Result<(), StreamError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{what} injection failed: {e}");
            false
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
