//! Camera-source capability.
//!
//! The platform backends capture frames on their own thread, push preview
//! buffers into the surface and feed the greyscale plane to the detector.

use std::sync::Arc;

use crate::detect::BarcodeDetector;
use crate::error::ScanError;
use crate::session::Surface;

#[cfg(target_os = "android")]
mod android;

#[cfg(not(target_os = "android"))]
mod desktop;

pub const PREVIEW_WIDTH: u32 = 1280;
pub const PREVIEW_HEIGHT: u32 = 720;

#[derive(Clone, Copy, Debug)]
pub struct CameraConfig {
    pub auto_focus: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig { auto_focus: true }
    }
}

/// A source of camera frames bound to one display surface.
pub trait FrameSource {
    /// Begins capturing into `surface`.
    fn start(&mut self, surface: &Surface) -> Result<(), ScanError>;

    /// Halts capture and releases the hardware. Idempotent.
    fn stop(&mut self);
}

/// Platform camera source.
pub struct CameraSource {
    #[cfg(target_os = "android")]
    inner: android::AndroidCamera,
    #[cfg(not(target_os = "android"))]
    inner: desktop::DesktopCamera,
}

impl CameraSource {
    pub fn build(config: CameraConfig, detector: Arc<BarcodeDetector>) -> Result<Self, ScanError> {
        Ok(CameraSource {
            #[cfg(target_os = "android")]
            inner: android::AndroidCamera::build(config, detector)?,
            #[cfg(not(target_os = "android"))]
            inner: desktop::DesktopCamera::build(config, detector),
        })
    }
}

impl FrameSource for CameraSource {
    fn start(&mut self, surface: &Surface) -> Result<(), ScanError> {
        self.inner.start(surface)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }
}

