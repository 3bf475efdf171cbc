//! Desktop camera backend over `kamera`.
//!
//! Capture runs on a worker thread guarded by a shared run flag; every frame
//! is repacked for the preview surface and its luma plane is handed to the
//! detector.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::channel,
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, Result};
use image::GrayImage;
use kamera::Camera as DeviceCamera;
use log::{debug, warn};
use slint::{Rgba8Pixel, SharedPixelBuffer};

use crate::detect::BarcodeDetector;
use crate::error::ScanError;
use crate::session::Surface;

use super::{CameraConfig, FrameSource};

const DEVICE_INDEX: usize = 0;
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DesktopCamera {
    config: CameraConfig,
    detector: Arc<BarcodeDetector>,
    run_flag: Option<Arc<AtomicBool>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl DesktopCamera {
    pub fn build(config: CameraConfig, detector: Arc<BarcodeDetector>) -> Self {
        DesktopCamera {
            config,
            detector,
            run_flag: None,
            worker: None,
        }
    }
}

impl FrameSource for DesktopCamera {
    fn start(&mut self, surface: &Surface) -> Result<(), ScanError> {
        self.stop();
        debug!(
            "starting desktop camera (auto focus: {})",
            self.config.auto_focus
        );

        let run_flag = Arc::new(AtomicBool::new(true));
        self.run_flag = Some(Arc::clone(&run_flag));

        let surface = surface.clone();
        let detector = Arc::clone(&self.detector);
        let (ready_tx, ready_rx) = channel();

        self.worker = Some(std::thread::spawn(move || {
            let camera = match DeviceCamera::new_device(DEVICE_INDEX) {
                Some(camera) => camera,
                None => {
                    let err = anyhow!("no camera device at index {DEVICE_INDEX}");
                    let _ = ready_tx.send(Err(anyhow!("{err}")));
                    return Err(err);
                }
            };
            camera.start();
            let _ = ready_tx.send(Ok(()));

            let mut rgba = Vec::new();
            loop {
                if !run_flag.load(Ordering::Acquire) {
                    break;
                }

                let frame = match camera.wait_for_frame() {
                    Some(frame) => frame,
                    None => {
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };

                let (width, height) = frame.size_u32();
                let frame_data = frame.data();
                bgra_to_rgba(frame_data.data_u8(), &mut rgba);

                surface.push_frame(SharedPixelBuffer::<Rgba8Pixel>::clone_from_slice(
                    &rgba, width, height,
                ));
                detector.process_frame(&rgba_to_luma(&rgba, width, height));
            }

            camera.stop();
            Ok(())
        }));

        // Surface open failures to the caller instead of losing them on the
        // worker thread.
        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.join_worker();
                Err(ScanError::camera_start(err))
            }
            Err(_) => {
                // A device that never comes up must not keep capturing in
                // the background; the flag stops the worker once the open
                // call returns, and stop()/drop joins it.
                if let Some(flag) = &self.run_flag {
                    flag.store(false, Ordering::Release);
                }
                Err(ScanError::camera_start(anyhow!(
                    "camera did not come up within {OPEN_TIMEOUT:?}"
                )))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(flag) = self.run_flag.take() {
            flag.store(false, Ordering::Release);
        }
        self.join_worker();
    }
}

impl DesktopCamera {
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(Ok(())) => debug!("camera worker stopped"),
                Ok(Err(err)) => warn!("camera worker exited with error: {err:?}"),
                Err(_) => warn!("camera worker panicked"),
            }
        }
    }
}

impl Drop for DesktopCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Repacks a BGRA frame into `rgba`, reusing its allocation.
fn bgra_to_rgba(bgra: &[u8], rgba: &mut Vec<u8>) {
    rgba.clear();
    rgba.reserve(bgra.len());
    for px in bgra.chunks_exact(4) {
        rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
}

/// Extracts a luma plane from an RGBA frame for the detector (BT.601
/// integer weights).
fn rgba_to_luma(rgba: &[u8], width: u32, height: u32) -> GrayImage {
    let mut luma = Vec::with_capacity((width * height) as usize);
    for px in rgba.chunks_exact(4) {
        let y = (299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32) / 1000;
        luma.push(y as u8);
    }
    GrayImage::from_raw(width, height, luma).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_repacks_to_rgba() {
        let bgra = [10u8, 20, 30, 255, 1, 2, 3, 128];
        let mut rgba = Vec::new();
        bgra_to_rgba(&bgra, &mut rgba);
        assert_eq!(rgba, vec![30, 20, 10, 255, 3, 2, 1, 128]);
    }

    #[test]
    fn luma_extraction_matches_extremes() {
        let rgba = [0u8, 0, 0, 255, 255, 255, 255, 255];
        let luma = rgba_to_luma(&rgba, 2, 1);
        assert_eq!(luma.get_pixel(0, 0).0[0], 0);
        assert_eq!(luma.get_pixel(1, 0).0[0], 255);
    }
}
