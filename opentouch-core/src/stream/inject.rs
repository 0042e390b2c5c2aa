//! Win32 `SendInput` mouse and keyboard injection.
//!
//! # Platform
//!
//! Windows-only. On other platforms the injector is defined but every
//! command returns [`StreamError::Injection`].

use crate::error::StreamError;
use crate::stream::keys::Key;
use crate::stream::router::{InjectionSink, MouseButton};

// ── InputInjector ────────────────────────────────────────────────

/// Injects mouse and keyboard events into the OS input stream.
///
/// On Windows this uses `SendInput`, which requires the process to run
/// in the interactive desktop session.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputInjector;

impl InputInjector {
    /// Create a new injector (no initialisation cost).
    pub fn new() -> Self {
        Self
    }
}

/// One wheel notch in `mouseData` units.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
const WHEEL_DELTA: i32 = 120;

/// Map a virtual-desktop coordinate onto the 0..=65535 range
/// `MOUSEEVENTF_VIRTUALDESK` expects, given the virtual screen's
/// `start` and `extent` along that axis.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn normalize(v: i32, start: i32, extent: i32) -> i32 {
    let span = (extent as i64 - 1).max(1);
    let offset = (v as i64 - start as i64).clamp(0, span);
    (offset * 65535 / span) as i32
}

/// Opt the process into per-monitor DPI awareness so capture sizes and
/// injected coordinates are physical pixels on scaled displays.
///
/// Must run before any window or DXGI object is created. A no-op off
/// Windows.
pub fn enable_dpi_awareness() {
    #[cfg(target_os = "windows")]
    {
        use windows::Win32::UI::HiDpi::{
            DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, SetProcessDpiAwarenessContext,
        };
        use windows::Win32::UI::WindowsAndMessaging::SetProcessDPIAware;

        let per_monitor =
            unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) };
        if let Err(e) = per_monitor {
            // Older than Windows 10 1703, or already set by a manifest.
            tracing::debug!("per-monitor DPI awareness unavailable ({e}); using system-aware");
            let _ = unsafe { SetProcessDPIAware() };
        }
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::stream::keys::NamedKey;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    fn send(inputs: &[INPUT], what: &str) -> Result<(), StreamError> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(StreamError::Injection(format!(
                "SendInput ({what}) injected {sent} of {}",
                inputs.len()
            )));
        }
        Ok(())
    }

    fn mouse(dx: i32, dy: i32, data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data as u32,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn keyboard(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn button_flags(button: MouseButton) -> (MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS) {
        match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        }
    }

    /// Virtual key and whether it needs `KEYEVENTF_EXTENDEDKEY`.
    fn virtual_key(key: NamedKey) -> (VIRTUAL_KEY, bool) {
        use NamedKey::*;
        match key {
            Enter => (VK_RETURN, false),
            Tab => (VK_TAB, false),
            Space => (VK_SPACE, false),
            Backspace => (VK_BACK, false),
            Delete => (VK_DELETE, true),
            Insert => (VK_INSERT, true),
            Escape => (VK_ESCAPE, false),
            Home => (VK_HOME, true),
            End => (VK_END, true),
            PageUp => (VK_PRIOR, true),
            PageDown => (VK_NEXT, true),
            ArrowUp => (VK_UP, true),
            ArrowDown => (VK_DOWN, true),
            ArrowLeft => (VK_LEFT, true),
            ArrowRight => (VK_RIGHT, true),
            Shift => (VK_SHIFT, false),
            Control => (VK_CONTROL, false),
            Alt => (VK_MENU, false),
            Meta => (VK_LWIN, true),
            CapsLock => (VK_CAPITAL, false),
            F1 => (VK_F1, false),
            F2 => (VK_F2, false),
            F3 => (VK_F3, false),
            F4 => (VK_F4, false),
            F5 => (VK_F5, false),
            F6 => (VK_F6, false),
            F7 => (VK_F7, false),
            F8 => (VK_F8, false),
            F9 => (VK_F9, false),
            F10 => (VK_F10, false),
            F11 => (VK_F11, false),
            F12 => (VK_F12, false),
        }
    }

    fn key_inputs(key: Key, up: bool) -> Vec<INPUT> {
        let release = if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) };
        match key {
            Key::Named(named) => {
                let (vk, extended) = virtual_key(named);
                let mut flags = release;
                if extended {
                    flags |= KEYEVENTF_EXTENDEDKEY;
                }
                vec![keyboard(vk, 0, flags)]
            }
            // Characters go through as UTF-16 units, independent of layout.
            Key::Char(c) => {
                let mut units = [0u16; 2];
                c.encode_utf16(&mut units)
                    .iter()
                    .map(|&unit| keyboard(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE | release))
                    .collect()
            }
        }
    }

    impl InjectionSink for InputInjector {
        fn move_to(&self, x: i32, y: i32) -> Result<(), StreamError> {
            // Spans every monitor, so secondary outputs are reachable.
            let (left, top, width, height) = unsafe {
                (
                    GetSystemMetrics(SM_XVIRTUALSCREEN),
                    GetSystemMetrics(SM_YVIRTUALSCREEN),
                    GetSystemMetrics(SM_CXVIRTUALSCREEN),
                    GetSystemMetrics(SM_CYVIRTUALSCREEN),
                )
            };
            if width <= 1 || height <= 1 {
                return Err(StreamError::Injection("GetSystemMetrics returned 0".into()));
            }

            let abs_x = normalize(x, left, width);
            let abs_y = normalize(y, top, height);
            send(
                &[mouse(
                    abs_x,
                    abs_y,
                    0,
                    MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK,
                )],
                "move",
            )
        }

        fn press(&self, button: MouseButton) -> Result<(), StreamError> {
            send(&[mouse(0, 0, 0, button_flags(button).0)], "press")
        }

        fn release(&self, button: MouseButton) -> Result<(), StreamError> {
            send(&[mouse(0, 0, 0, button_flags(button).1)], "release")
        }

        fn click(&self, button: MouseButton, count: u32) -> Result<(), StreamError> {
            let (down, up) = button_flags(button);
            let inputs: Vec<INPUT> = (0..count)
                .flat_map(|_| [mouse(0, 0, 0, down), mouse(0, 0, 0, up)])
                .collect();
            send(&inputs, "click")
        }

        fn scroll(&self, dx: i32, dy: i32) -> Result<(), StreamError> {
            let mut inputs = Vec::with_capacity(2);
            if dy != 0 {
                inputs.push(mouse(0, 0, dy.saturating_mul(WHEEL_DELTA), MOUSEEVENTF_WHEEL));
            }
            if dx != 0 {
                inputs.push(mouse(0, 0, dx.saturating_mul(WHEEL_DELTA), MOUSEEVENTF_HWHEEL));
            }
            if inputs.is_empty() {
                return Ok(());
            }
            send(&inputs, "scroll")
        }

        fn key_press(&self, key: Key) -> Result<(), StreamError> {
            send(&key_inputs(key, false), "key press")
        }

        fn key_release(&self, key: Key) -> Result<(), StreamError> {
            send(&key_inputs(key, true), "key release")
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::*;

    fn unsupported() -> Result<(), StreamError> {
        Err(StreamError::Injection(
            "input injection is only available on Windows".into(),
        ))
    }

    impl InjectionSink for InputInjector {
        fn move_to(&self, _x: i32, _y: i32) -> Result<(), StreamError> {
            unsupported()
        }

        fn press(&self, _button: MouseButton) -> Result<(), StreamError> {
            unsupported()
        }

        fn release(&self, _button: MouseButton) -> Result<(), StreamError> {
            unsupported()
        }

        fn click(&self, _button: MouseButton, _count: u32) -> Result<(), StreamError> {
            unsupported()
        }

        fn scroll(&self, _dx: i32, _dy: i32) -> Result<(), StreamError> {
            unsupported()
        }

        fn key_press(&self, _key: Key) -> Result<(), StreamError> {
            unsupported()
        }

        fn key_release(&self, _key: Key) -> Result<(), StreamError> {
            unsupported()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_creates_without_error() {
        let _inj = InputInjector::new();
    }

    #[test]
    fn normalize_spans_the_virtual_desktop() {
        // Two 1920-wide monitors, the secondary left of the primary.
        assert_eq!(normalize(-1920, -1920, 3840), 0);
        assert_eq!(normalize(1919, -1920, 3840), 65535);
        assert_eq!(normalize(0, -1920, 3840), 1920 * 65535 / 3839);
        // Off the desktop clamps to its edges.
        assert_eq!(normalize(-5000, -1920, 3840), 0);
        assert_eq!(normalize(9000, -1920, 3840), 65535);
    }

    #[test]
    fn dpi_awareness_can_be_requested_twice() {
        enable_dpi_awareness();
        enable_dpi_awareness();
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn stub_reports_injection_errors() {
        let inj = InputInjector::new();
        assert!(matches!(inj.move_to(0, 0), Err(StreamError::Injection(_))));
        assert!(matches!(
            inj.key_press(Key::Char('a')),
            Err(StreamError::Injection(_))
        ));
    }
}
