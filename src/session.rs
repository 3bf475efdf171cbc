//! Scan session lifecycle.
//!
//! A session owns exactly one camera source and one detector, created
//! together on the first surface-available event and released together. The
//! session follows the surface lifecycle and never leaves the camera
//! running once the surface is gone.

use std::sync::{mpsc::Sender, Arc};

use log::debug;
use slint::{Rgba8Pixel, SharedPixelBuffer};

use crate::camera::FrameSource;
use crate::detect::{BarcodeDetector, DetectionGate, DetectionProcessor};
use crate::error::ScanError;

/// Events pumped from the capture thread to the UI thread.
pub enum SessionEvent {
    /// A preview frame ready for display.
    Preview(SharedPixelBuffer<Rgba8Pixel>),
    /// The one-shot decoded payload.
    Decoded(String),
}

/// The drawable region receiving live camera frames, as a cloneable handle
/// over the UI-bound event channel plus the requested preview size.
#[derive(Clone)]
pub struct Surface {
    events: Sender<SessionEvent>,
    width: u32,
    height: u32,
}

impl Surface {
    pub fn new(events: Sender<SessionEvent>, width: u32, height: u32) -> Self {
        Surface {
            events,
            width,
            height,
        }
    }

    /// Requested preview size in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn push_frame(&self, frame: SharedPixelBuffer<Rgba8Pixel>) {
        // The receiver disappears when the screen is torn down; frames
        // arriving after that are dropped.
        let _ = self.events.send(SessionEvent::Preview(frame));
    }

    pub fn sender(&self) -> Sender<SessionEvent> {
        self.events.clone()
    }
}

/// Surface lifecycle notifications delivered by the hosting screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Created,
    Changed,
    Destroyed,
}

/// Observes the surface lifecycle of exactly one display surface.
pub trait SurfaceObserver {
    fn on_surface_event(&mut self, event: SurfaceEvent, surface: &Surface)
        -> Result<(), ScanError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Capturing,
    Stopped,
}

/// Builds the platform camera source once the detector exists.
pub type CameraFactory =
    Box<dyn FnMut(Arc<BarcodeDetector>) -> Result<Box<dyn FrameSource>, ScanError>>;

pub struct ScanSession {
    state: SessionState,
    build_camera: CameraFactory,
    on_decoded: Option<Box<dyn FnMut(String) + Send>>,
    camera: Option<Box<dyn FrameSource>>,
    detector: Option<Arc<BarcodeDetector>>,
    gate: Option<Arc<DetectionGate>>,
}

impl ScanSession {
    pub fn new(build_camera: CameraFactory, on_decoded: Box<dyn FnMut(String) + Send>) -> Self {
        ScanSession {
            state: SessionState::Uninitialized,
            build_camera,
            on_decoded: Some(on_decoded),
            camera: None,
            detector: None,
            gate: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the one-shot detection latch has fired.
    pub fn detection_consumed(&self) -> bool {
        self.gate.as_ref().is_some_and(|gate| gate.consumed())
    }

    /// Handle to the session's detector, once the pair exists.
    pub fn detector(&self) -> Option<Arc<BarcodeDetector>> {
        self.detector.clone()
    }

    /// Constructs the detector/camera pair if needed and begins capturing
    /// into `surface`. Already capturing is a no-op.
    pub fn start(&mut self, surface: &Surface) -> Result<(), ScanError> {
        if self.state == SessionState::Capturing {
            return Ok(());
        }

        if self.camera.is_none() {
            let detector = Arc::new(BarcodeDetector::build());
            // The latch survives a failed camera build, so a retried start
            // keeps its at-most-once guarantee.
            if self.gate.is_none() {
                if let Some(handler) = self.on_decoded.take() {
                    self.gate = Some(Arc::new(DetectionGate::new(handler)));
                }
            }
            if let Some(gate) = &self.gate {
                detector.set_processor(Arc::clone(gate) as Arc<dyn DetectionProcessor>);
            }
            let camera = (self.build_camera)(Arc::clone(&detector))?;
            self.detector = Some(detector);
            self.camera = Some(camera);
        }

        if let Some(camera) = self.camera.as_mut() {
            camera.start(surface)?;
        }
        self.state = SessionState::Capturing;
        Ok(())
    }

    /// Halts capture and releases camera hardware. Idempotent; a no-op if
    /// nothing was ever started.
    pub fn stop(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            camera.stop();
            self.state = SessionState::Stopped;
        }
    }
}

impl SurfaceObserver for ScanSession {
    fn on_surface_event(
        &mut self,
        event: SurfaceEvent,
        surface: &Surface,
    ) -> Result<(), ScanError> {
        debug!("surface event: {event:?}");
        match event {
            SurfaceEvent::Created => self.start(surface),
            SurfaceEvent::Changed => Ok(()),
            SurfaceEvent::Destroyed => {
                self.stop();
                Ok(())
            }
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
    }
}
