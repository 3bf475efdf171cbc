//! Android camera backend over the NDK camera2 API.
//!
//! The first camera device feeds an `AImageReader`; its image-available
//! listener runs on a thread owned by the camera HAL, converts the
//! YUV_420_888 frame for the preview surface and hands the luma plane to
//! the detector.

use core::slice;
use std::ffi::{c_int, c_void, CStr};
use std::mem::zeroed;
use std::ptr::null_mut;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{
    imageops::{rotate180, rotate270, rotate90},
    RgbaImage,
};
use log::{debug, error, info};
use ndk_sys::{
    acamera_metadata_enum_acamera_control_af_mode, acamera_metadata_tag, camera_status_t,
    media_status_t, ACameraCaptureSession, ACameraCaptureSession_close,
    ACameraCaptureSession_setRepeatingRequest, ACameraCaptureSession_stateCallbacks,
    ACameraCaptureSession_stopRepeating, ACameraDevice, ACameraDevice_StateCallbacks,
    ACameraDevice_close, ACameraDevice_createCaptureRequest, ACameraDevice_createCaptureSession,
    ACameraDevice_getId, ACameraDevice_request_template, ACameraManager_create,
    ACameraManager_delete, ACameraManager_deleteCameraIdList,
    ACameraManager_getCameraCharacteristics, ACameraManager_getCameraIdList,
    ACameraManager_openCamera, ACameraMetadata_const_entry, ACameraMetadata_free, ACameraMetadata_getConstEntry,
    ACameraOutputTarget, ACameraOutputTarget_create, ACameraOutputTarget_free, ACaptureRequest,
    ACaptureRequest_addTarget, ACaptureRequest_free, ACaptureRequest_setEntry_u8,
    ACaptureSessionOutput, ACaptureSessionOutputContainer, ACaptureSessionOutputContainer_add,
    ACaptureSessionOutputContainer_create, ACaptureSessionOutputContainer_free,
    ACaptureSessionOutput_create, ACaptureSessionOutput_free, AImageReader, AImageReader_ImageListener,
    AImageReader_acquireLatestImage, AImageReader_delete, AImageReader_getWindow, AImageReader_new,
    AImageReader_setImageListener, AImage_delete, AImage_getPlaneData, AImage_getPlaneRowStride,
    ANativeWindow, AIMAGE_FORMATS,
};
use slint::{Rgba8Pixel, SharedPixelBuffer};

use crate::detect::BarcodeDetector;
use crate::error::ScanError;
use crate::session::Surface;

use super::{CameraConfig, FrameSource};

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

pub struct AndroidCamera {
    // Boxed so the raw pointer handed to the image listener stays stable
    // while the camera source itself moves around.
    inner: Box<Inner>,
}

struct Inner {
    config: CameraConfig,
    detector: Arc<BarcodeDetector>,
    surface: Option<Surface>,
    device: *mut ACameraDevice,
    capture_session: *mut ACameraCaptureSession,
    request: *mut ACaptureRequest,
    output_target: *mut ACameraOutputTarget,
    session_output: *mut ACaptureSessionOutput,
    output_container: *mut ACaptureSessionOutputContainer,
    reader: *mut AImageReader,
    device_callbacks: ACameraDevice_StateCallbacks,
    session_callbacks: ACameraCaptureSession_stateCallbacks,
    image_listener: AImageReader_ImageListener,
    sensor_orientation: i32,
    rgba: Vec<u8>,
}

impl AndroidCamera {
    pub fn build(config: CameraConfig, detector: Arc<BarcodeDetector>) -> Result<Self, ScanError> {
        Ok(AndroidCamera {
            inner: Box::new(Inner {
                config,
                detector,
                surface: None,
                device: null_mut(),
                capture_session: null_mut(),
                request: null_mut(),
                output_target: null_mut(),
                session_output: null_mut(),
                output_container: null_mut(),
                reader: null_mut(),
                device_callbacks: unsafe { zeroed() },
                session_callbacks: unsafe { zeroed() },
                image_listener: AImageReader_ImageListener {
                    context: null_mut(),
                    onImageAvailable: None,
                },
                sensor_orientation: 0,
                rgba: Vec::new(),
            }),
        })
    }
}

impl FrameSource for AndroidCamera {
    fn start(&mut self, surface: &Surface) -> Result<(), ScanError> {
        self.stop();
        self.inner.surface = Some(surface.clone());
        let (width, height) = surface.size();

        let started = self
            .inner
            .open_device()
            .and_then(|()| self.inner.start_capture(width, height));
        if let Err(err) = started {
            self.inner.release();
            return Err(ScanError::camera_start(err));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.release();
    }
}

impl Drop for AndroidCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Opens the first camera device and reads its sensor orientation.
    fn open_device(&mut self) -> Result<()> {
        unsafe {
            let manager = ACameraManager_create();
            let mut id_list = null_mut();
            let status = ACameraManager_getCameraIdList(manager, &mut id_list);
            if status != camera_status_t::ACAMERA_OK || id_list.is_null() {
                ACameraManager_delete(manager);
                return Err(anyhow!("failed to list camera devices ({status:?})"));
            }

            if (*id_list).numCameras < 1 {
                ACameraManager_deleteCameraIdList(id_list);
                ACameraManager_delete(manager);
                return Err(anyhow!("no camera device detected"));
            }
            let ids = slice::from_raw_parts((*id_list).cameraIds, (*id_list).numCameras as usize);
            let camera_id = ids[0];
            info!(
                "opening camera {:?} of {}",
                CStr::from_ptr(camera_id).to_str().unwrap_or("?"),
                (*id_list).numCameras
            );

            let mut metadata = null_mut();
            let status = ACameraManager_getCameraCharacteristics(manager, camera_id, &mut metadata);
            if status == camera_status_t::ACAMERA_OK {
                let mut entry: ACameraMetadata_const_entry = zeroed();
                let status = ACameraMetadata_getConstEntry(
                    metadata,
                    acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION.0,
                    &mut entry,
                );
                if status == camera_status_t::ACAMERA_OK && entry.count > 0 {
                    self.sensor_orientation = *entry.data.i32_;
                }
                ACameraMetadata_free(metadata);
            }
            debug!("sensor orientation: {}", self.sensor_orientation);

            unsafe extern "C" fn on_disconnected(_ctx: *mut c_void, device: *mut ACameraDevice) {
                info!("camera {:?} disconnected", device_id(device));
            }
            unsafe extern "C" fn on_error(
                _ctx: *mut c_void,
                device: *mut ACameraDevice,
                code: c_int,
            ) {
                error!("camera {:?} error {code}", device_id(device));
            }
            self.device_callbacks.onDisconnected = Some(on_disconnected);
            self.device_callbacks.onError = Some(on_error);

            let status = ACameraManager_openCamera(
                manager,
                camera_id,
                &mut self.device_callbacks,
                &mut self.device,
            );
            ACameraManager_deleteCameraIdList(id_list);
            ACameraManager_delete(manager);
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("failed to open camera device ({status:?})"));
            }
        }
        Ok(())
    }

    /// Creates the image reader and the repeating preview request.
    fn start_capture(&mut self, width: u32, height: u32) -> Result<()> {
        self.rgba = vec![0; (width * height * 4) as usize];
        unsafe {
            let status = AImageReader_new(
                width as i32,
                height as i32,
                AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32,
                2,
                &mut self.reader,
            );
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!("failed to create image reader ({status:?})"));
            }

            unsafe extern "C" fn on_image(context: *mut c_void, _reader: *mut AImageReader) {
                let inner = &mut *(context as *mut Inner);
                if let Err(err) = inner.on_image_available() {
                    debug!("frame dropped: {err}");
                }
            }
            self.image_listener.context = (self as *mut Inner) as *mut c_void;
            self.image_listener.onImageAvailable = Some(on_image);
            let status = AImageReader_setImageListener(self.reader, &mut self.image_listener);
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!("failed to set image listener ({status:?})"));
            }

            let status = ACameraDevice_createCaptureRequest(
                self.device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.request,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("failed to create preview request ({status:?})"));
            }

            if self.config.auto_focus {
                let af_mode = acamera_metadata_enum_acamera_control_af_mode::ACAMERA_CONTROL_AF_MODE_CONTINUOUS_PICTURE
                    .0 as u8;
                let status = ACaptureRequest_setEntry_u8(
                    self.request,
                    acamera_metadata_tag::ACAMERA_CONTROL_AF_MODE.0,
                    1,
                    &af_mode,
                );
                if status != camera_status_t::ACAMERA_OK {
                    debug!("continuous auto focus unavailable ({status:?})");
                }
            }

            let mut window: *mut ANativeWindow = null_mut();
            let status = AImageReader_getWindow(self.reader, &mut window);
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!("failed to get reader window ({status:?})"));
            }

            ACameraOutputTarget_create(window, &mut self.output_target);
            ACaptureRequest_addTarget(self.request, self.output_target);

            ACaptureSessionOutput_create(window, &mut self.session_output);
            let status = ACaptureSessionOutputContainer_create(&mut self.output_container);
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("failed to create session outputs ({status:?})"));
            }
            ACaptureSessionOutputContainer_add(self.output_container, self.session_output);

            unsafe extern "C" fn on_session_ready(
                _ctx: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                debug!("capture session ready: {session:?}");
            }
            unsafe extern "C" fn on_session_active(
                _ctx: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                debug!("capture session active: {session:?}");
            }
            unsafe extern "C" fn on_session_closed(
                _ctx: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                debug!("capture session closed: {session:?}");
            }
            self.session_callbacks.onReady = Some(on_session_ready);
            self.session_callbacks.onActive = Some(on_session_active);
            self.session_callbacks.onClosed = Some(on_session_closed);
            self.session_callbacks.context = null_mut();

            let status = ACameraDevice_createCaptureSession(
                self.device,
                self.output_container,
                &self.session_callbacks,
                &mut self.capture_session,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("failed to create capture session ({status:?})"));
            }

            let status = ACameraCaptureSession_setRepeatingRequest(
                self.capture_session,
                null_mut(),
                1,
                &mut self.request,
                null_mut(),
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("failed to set repeating request ({status:?})"));
            }
        }
        Ok(())
    }

    /// Runs on the HAL callback thread for every captured frame.
    fn on_image_available(&mut self) -> Result<()> {
        let Some(surface) = self.surface.clone() else {
            return Ok(());
        };
        let (width, height) = surface.size();

        unsafe {
            let mut image = null_mut();
            let status = AImageReader_acquireLatestImage(self.reader, &mut image);
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!("no frame available ({status:?})"));
            }

            let mut y_stride = 0;
            let mut y_ptr = null_mut();
            let mut y_len = 0;
            AImage_getPlaneRowStride(image, 0, &mut y_stride);
            AImage_getPlaneData(image, 0, &mut y_ptr, &mut y_len);

            // The three planes of a YUV_420_888 reader image are one
            // contiguous block starting at the Y plane, with the chroma
            // samples interleaved behind it.
            let yuv = slice::from_raw_parts(y_ptr, (width * height + width * height / 2) as usize);

            yuv420sp_to_rgba(yuv, width, height, &mut self.rgba);
            if let Some(preview) = rotate_for_display(&self.rgba, width, height, self.sensor_orientation)
            {
                surface.push_frame(preview);
            }

            let gray = luma_plane(yuv, width, height, y_stride as u32);
            self.detector.process_frame(&gray);

            AImage_delete(image);
        }
        Ok(())
    }

    /// Tears down the capture session, device and reader. Safe on a
    /// never-started camera.
    fn release(&mut self) {
        unsafe {
            if !self.capture_session.is_null() {
                ACameraCaptureSession_stopRepeating(self.capture_session);
                ACameraCaptureSession_close(self.capture_session);
                self.capture_session = null_mut();
            }
            if !self.reader.is_null() {
                AImageReader_setImageListener(self.reader, null_mut());
                AImageReader_delete(self.reader);
                self.reader = null_mut();
            }
            if !self.request.is_null() {
                ACaptureRequest_free(self.request);
                self.request = null_mut();
            }
            if !self.output_target.is_null() {
                ACameraOutputTarget_free(self.output_target);
                self.output_target = null_mut();
            }
            if !self.session_output.is_null() {
                ACaptureSessionOutput_free(self.session_output);
                self.session_output = null_mut();
            }
            if !self.output_container.is_null() {
                ACaptureSessionOutputContainer_free(self.output_container);
                self.output_container = null_mut();
            }
            if !self.device.is_null() {
                let status = ACameraDevice_close(self.device);
                if status != camera_status_t::ACAMERA_OK {
                    error!("failed to close camera device ({status:?})");
                }
                self.device = null_mut();
            }
        }
        self.surface = None;
        debug!("camera released");
    }
}

unsafe fn device_id<'a>(device: *mut ACameraDevice) -> Option<&'a str> {
    let id = ACameraDevice_getId(device);
    if id.is_null() {
        return None;
    }
    CStr::from_ptr(id).to_str().ok()
}

/// YUV420SP to RGBA, written into `rgba` which is reused across frames.
fn yuv420sp_to_rgba(data: &[u8], width: u32, height: u32, rgba: &mut Vec<u8>) {
    let width = width as i32;
    let height = height as i32;
    let frame_size = width * height;
    rgba.clear();
    rgba.reserve(frame_size as usize * 4);
    let mut yp = 0usize;
    for j in 0..height {
        let (mut uvp, mut u, mut v) = ((frame_size + (j >> 1) * width) as usize, 0, 0);
        for i in 0..width {
            let y = ((0xff & data[yp] as i32) - 16).max(0);
            if i & 1 == 0 {
                v = (0xff & data[uvp] as i32) - 128;
                u = (0xff & data[uvp + 1] as i32) - 128;
                uvp += 2;
            }

            let y1192 = 1192 * y;
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);

            rgba.extend_from_slice(&[
                ((r >> 10) & 0xff) as u8,
                ((g >> 10) & 0xff) as u8,
                ((b >> 10) & 0xff) as u8,
                255,
            ]);
            yp += 1;
        }
    }
}

/// Rotates the frame to the sensor orientation for display.
fn rotate_for_display(
    rgba: &[u8],
    width: u32,
    height: u32,
    orientation: i32,
) -> Option<SharedPixelBuffer<Rgba8Pixel>> {
    let frame = RgbaImage::from_raw(width, height, rgba.to_vec())?;
    let rotated = match orientation {
        90 => rotate90(&frame),
        180 => rotate180(&frame),
        270 => rotate270(&frame),
        _ => frame,
    };
    let (w, h) = rotated.dimensions();
    Some(SharedPixelBuffer::clone_from_slice(rotated.as_raw(), w, h))
}

/// Copies the Y plane into a detector frame, honouring the row stride. The
/// detector handles code orientation itself, so no rotation here.
fn luma_plane(yuv: &[u8], width: u32, height: u32, y_stride: u32) -> image::GrayImage {
    let mut luma = Vec::with_capacity((width * height) as usize);
    for row in 0..height {
        let start = (row * y_stride) as usize;
        luma.extend_from_slice(&yuv[start..start + width as usize]);
    }
    image::GrayImage::from_raw(width, height, luma)
        .unwrap_or_else(|| image::GrayImage::new(width, height))
}
