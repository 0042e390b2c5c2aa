//! Frame sources: the trait the capture loop polls, plus the DXGI
//! Desktop Duplication implementation for Windows.
//!
//! # Platform
//!
//! [`DxgiCapturer`] is **Windows-only**. On other platforms the type is
//! still defined but construction fails, which surfaces as a capture
//! initialization error from [`CaptureLoop::start`](crate::stream::CaptureLoop::start).

use std::sync::Arc;

use crate::error::StreamError;
use crate::stream::types::RawFrame;

// ── FrameSource ──────────────────────────────────────────────────

/// Something that yields raw desktop frames on demand.
///
/// Sources are created and used on the capture thread only, so they
/// do not need to be `Send`.
pub trait FrameSource {
    /// Poll for the latest frame without blocking.
    ///
    /// `Ok(None)` means nothing is available yet; the capture loop
    /// retries after a short sleep.
    fn latest_frame(&mut self) -> Result<Option<RawFrame>, StreamError>;

    /// Native dimensions `(width, height)` of the captured output.
    fn dimensions(&self) -> (u32, u32);

    /// Top-left corner of the output on the virtual desktop, in the same
    /// physical pixels as [`dimensions`](Self::dimensions).
    fn origin(&self) -> (i32, i32) {
        (0, 0)
    }
}

/// Builds a fresh [`FrameSource`] each time capture starts.
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameSource>, StreamError> + Send + Sync>;

// ── DxgiCapturer ─────────────────────────────────────────────────

/// DXGI-based screen capturer.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device.
/// 2. Enumerate outputs and duplicate the target monitor.
/// 3. Create a CPU-readable staging texture.
/// 4. On each poll, `AcquireNextFrame` with a zero timeout, copy to the
///    staging texture, map and copy into an owned buffer.
///
/// The compositor only hands out a frame when the desktop changed, so
/// the last captured frame is kept and returned again on a timeout.
/// Change detection downstream decides whether it is worth resending.
///
/// When the duplication is invalidated (secure desktop, mode change,
/// fullscreen switch) it is recreated on the next poll.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct.
pub struct DxgiCapturer {
    /// Screen width in pixels.
    width: u32,
    /// Screen height in pixels.
    height: u32,
    /// Output position on the virtual desktop.
    origin: (i32, i32),
    /// Most recent frame, served again while the desktop is idle.
    last: Option<RawFrame>,

    // ── Platform handles (Windows only) ──────────────────────
    #[cfg(target_os = "windows")]
    device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    #[cfg(target_os = "windows")]
    output: windows::Win32::Graphics::Dxgi::IDXGIOutput1,
    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    /// `None` after an access loss until recreated.
    #[cfg(target_os = "windows")]
    duplication: Option<windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication>,
    #[cfg(target_os = "windows")]
    staging_texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

impl DxgiCapturer {
    /// A [`SourceFactory`] that duplicates monitor `monitor_index`.
    pub fn factory(monitor_index: u32) -> SourceFactory {
        Arc::new(move || {
            let capturer = DxgiCapturer::new(monitor_index)?;
            Ok(Box::new(capturer) as Box<dyn FrameSource>)
        })
    }
}

impl DxgiCapturer {
    /// Fold one capture attempt into the cached frame. Timeouts, which
    /// include a recovered access loss, serve the cache.
    fn settle(
        &mut self,
        captured: Result<RawFrame, StreamError>,
    ) -> Result<Option<RawFrame>, StreamError> {
        match captured {
            Ok(frame) => {
                self.last = Some(frame.clone());
                Ok(Some(frame))
            }
            Err(StreamError::Timeout(_)) => Ok(self.last.clone()),
            Err(e) => Err(e),
        }
    }
}

impl FrameSource for DxgiCapturer {
    fn latest_frame(&mut self) -> Result<Option<RawFrame>, StreamError> {
        let captured = self.capture_frame(0);
        self.settle(captured)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn origin(&self) -> (i32, i32) {
        self.origin
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::stream::types::PixelFormat;
    use windows::{
        core::Interface,
        Win32::Foundation::E_POINTER,
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
    };

    impl DxgiCapturer {
        /// Initialise the capturer for monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32) -> Result<Self, StreamError> {
            unsafe { Self::init_dxgi(monitor_index) }
        }

        unsafe fn init_dxgi(monitor_index: u32) -> Result<Self, StreamError> {
            let init = |what: &str, e: windows::core::Error| {
                StreamError::CaptureInit(format!("{what} failed: {e}"))
            };

            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| init("D3D11CreateDevice", e))?;
            }

            let device: ID3D11Device =
                device.ok_or_else(|| StreamError::CaptureInit("D3D11 device is None".into()))?;
            let context = context
                .ok_or_else(|| StreamError::CaptureInit("D3D11 context is None".into()))?;

            // Device → Adapter → Output.
            let dxgi_device: IDXGIDevice = device.cast().map_err(|e| init("cast to IDXGIDevice", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter().map_err(|e| init("GetAdapter", e))? };
            let output: IDXGIOutput = unsafe {
                adapter
                    .EnumOutputs(monitor_index)
                    .map_err(|e| init(&format!("EnumOutputs({monitor_index})"), e))?
            };

            let output_desc = unsafe { output.GetDesc().map_err(|e| init("GetDesc (output)", e))? };
            let bounds = output_desc.DesktopCoordinates;

            let output1: IDXGIOutput1 = output.cast().map_err(|e| init("cast to IDXGIOutput1", e))?;
            let duplication = unsafe {
                output1
                    .DuplicateOutput(&device)
                    .map_err(|e| init("DuplicateOutput", e))?
            };

            let dup_desc = unsafe { duplication.GetDesc() };
            let width = dup_desc.ModeDesc.Width;
            let height = dup_desc.ModeDesc.Height;
            let staging_texture = unsafe { Self::staging_texture(&device, width, height) }
                .map_err(|e| init("CreateTexture2D (staging)", e))?;

            tracing::info!(
                monitor_index,
                width,
                height,
                x = bounds.left,
                y = bounds.top,
                "DXGI duplication ready"
            );

            Ok(Self {
                width,
                height,
                origin: (bounds.left, bounds.top),
                last: None,
                device,
                output: output1,
                context,
                duplication: Some(duplication),
                staging_texture,
            })
        }

        /// CPU-readable texture matching the duplicated output.
        unsafe fn staging_texture(
            device: &ID3D11Device,
            width: u32,
            height: u32,
        ) -> windows::core::Result<ID3D11Texture2D> {
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging_texture = None;
            unsafe { device.CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))? };
            staging_texture.ok_or_else(|| windows::core::Error::from(E_POINTER))
        }

        /// Duplicate the output again after `DXGI_ERROR_ACCESS_LOST`.
        ///
        /// Fails while the secure desktop is shown; the next poll retries.
        unsafe fn reacquire(&mut self) -> Result<(), StreamError> {
            let lost = |what: &str, e: windows::core::Error| {
                StreamError::Capture(format!("{what} after access loss failed: {e}"))
            };

            // The stale interface must be released first.
            self.duplication = None;
            let duplication = unsafe {
                self.output
                    .DuplicateOutput(&self.device)
                    .map_err(|e| lost("DuplicateOutput", e))?
            };
            let desc = unsafe { duplication.GetDesc() };
            let (width, height) = (desc.ModeDesc.Width, desc.ModeDesc.Height);

            if (width, height) != (self.width, self.height) {
                self.staging_texture = unsafe { Self::staging_texture(&self.device, width, height) }
                    .map_err(|e| lost("CreateTexture2D (staging)", e))?;
                tracing::warn!(
                    old_width = self.width,
                    old_height = self.height,
                    width,
                    height,
                    "output mode changed; pointer mapping keeps the size from capture start"
                );
                self.width = width;
                self.height = height;
                self.last = None;
            }

            self.duplication = Some(duplication);
            tracing::info!("DXGI duplication recreated");
            Ok(())
        }

        /// Capture the next desktop frame.
        ///
        /// Waits up to `timeout_ms` for the compositor. Returns
        /// [`StreamError::Timeout`] if the desktop did not change.
        pub fn capture_frame(&mut self, timeout_ms: u32) -> Result<RawFrame, StreamError> {
            unsafe { self.capture_inner(timeout_ms) }
        }

        unsafe fn capture_inner(&mut self, timeout_ms: u32) -> Result<RawFrame, StreamError> {
            let idle = || StreamError::Timeout(Duration::from_millis(timeout_ms as u64));
            let Some(duplication) = self.duplication.clone() else {
                unsafe { self.reacquire()? };
                return Err(idle());
            };

            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe { duplication.AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource) } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Err(idle()),
                // Nothing new to copy this time; serve the last frame.
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                    drop(duplication);
                    unsafe { self.reacquire()? };
                    return Err(idle());
                }
                Err(e) => {
                    return Err(StreamError::Capture(format!("AcquireNextFrame failed: {e}")));
                }
            }

            let resource = match resource {
                Some(r) => r,
                None => {
                    let _ = unsafe { duplication.ReleaseFrame() };
                    return Err(StreamError::Capture("acquired resource is None".into()));
                }
            };

            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                let _ = unsafe { duplication.ReleaseFrame() };
                StreamError::Capture(format!("cast to ID3D11Texture2D failed: {e}"))
            })?;

            unsafe {
                self.context.CopyResource(&self.staging_texture, &texture);
            }

            // Release the DXGI frame as early as possible.
            let _ = unsafe { duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| StreamError::Capture(format!("Map failed: {e}")))?;
            }

            let stride = mapped.RowPitch;
            let total_bytes = stride as usize * self.height as usize;
            let src = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total_bytes) };
            let data = src.to_vec();

            unsafe { self.context.Unmap(&self.staging_texture, 0) };

            Ok(RawFrame {
                width: self.width,
                height: self.height,
                stride,
                format: PixelFormat::Bgra8,
                data: data.into(),
                timestamp: Instant::now(),
            })
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32) -> Result<Self, StreamError> {
        Err(StreamError::CaptureInit(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }

    pub fn capture_frame(&mut self, _timeout_ms: u32) -> Result<RawFrame, StreamError> {
        Err(StreamError::Capture("not supported on this platform".into()))
    }
}
