//! Barcode detection capability.
//!
//! Decoding itself is delegated to the `rqrr` library; this module owns the
//! narrow processor adapter around it and the one-shot latch that turns a
//! stream of per-frame detection batches into a single hand-off.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use image::GrayImage;
use log::{debug, info};

/// One decoded item produced by the detector for a single processed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedCandidate {
    pub display_value: String,
}

/// Receives the detector output for every processed frame.
///
/// Runs on the capture thread owned by the camera source, so implementations
/// must keep their work minimal and thread safe.
pub trait DetectionProcessor: Send + Sync {
    /// Called once per processed frame; `batch` may be empty.
    fn on_detection_batch(&self, batch: &[DecodedCandidate]);

    /// Required by the detector capability contract; performs no cleanup.
    fn release(&self) {}
}

/// Handle to the external detection library.
pub struct BarcodeDetector {
    processor: Mutex<Option<Arc<dyn DetectionProcessor>>>,
}

impl BarcodeDetector {
    pub fn build() -> Self {
        BarcodeDetector {
            processor: Mutex::new(None),
        }
    }

    pub fn set_processor(&self, processor: Arc<dyn DetectionProcessor>) {
        if let Ok(mut slot) = self.processor.lock() {
            slot.replace(processor);
        }
    }

    /// Decodes one greyscale frame and delivers the resulting batch.
    pub fn process_frame(&self, frame: &GrayImage) {
        let batch = decode_frame(frame);
        self.deliver(&batch);
    }

    /// Hands a detection batch to the registered processor. A batch is
    /// delivered for every frame, including empty ones.
    pub fn deliver(&self, batch: &[DecodedCandidate]) {
        let processor = match self.processor.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(processor) = processor {
            processor.on_detection_batch(batch);
        }
    }
}

/// Runs the vision library over one frame. Undecodable grids are skipped;
/// candidates come back in the library's grid order.
fn decode_frame(frame: &GrayImage) -> Vec<DecodedCandidate> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
        frame.get_pixel(x as u32, y as u32).0[0]
    });

    let mut batch = Vec::new();
    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_meta, text)) => batch.push(DecodedCandidate {
                display_value: text,
            }),
            Err(err) => debug!("undecodable grid skipped: {err}"),
        }
    }
    batch
}

type DecodedHandler = Mutex<Box<dyn FnMut(String) + Send>>;

/// One-shot latch over the detector callback.
///
/// The first candidate of the first non-empty batch wins; every later batch
/// is a no-op for the lifetime of the owning session. `consumed` is read and
/// written from the capture thread while the UI thread may be tearing the
/// session down, hence the atomic compare-and-set.
pub struct DetectionGate {
    consumed: AtomicBool,
    on_decoded: DecodedHandler,
}

impl DetectionGate {
    pub fn new(on_decoded: Box<dyn FnMut(String) + Send>) -> Self {
        DetectionGate {
            consumed: AtomicBool::new(false),
            on_decoded: Mutex::new(on_decoded),
        }
    }

    pub fn consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }
}

impl DetectionProcessor for DetectionGate {
    fn on_detection_batch(&self, batch: &[DecodedCandidate]) {
        if self.consumed.load(Ordering::Acquire) {
            return;
        }
        let Some(first) = batch.first() else {
            return;
        };
        if self
            .consumed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("code found: {}", first.display_value);
            if let Ok(mut handler) = self.on_decoded.lock() {
                handler(first.display_value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::thread;

    use super::*;

    fn batch(values: &[&str]) -> Vec<DecodedCandidate> {
        values
            .iter()
            .map(|v| DecodedCandidate {
                display_value: (*v).to_string(),
            })
            .collect()
    }

    fn counting_gate() -> (Arc<DetectionGate>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let gate = Arc::new(DetectionGate::new(Box::new(move |text| {
            sink.lock().unwrap().push(text);
        })));
        (gate, seen)
    }

    #[test]
    fn first_candidate_of_first_non_empty_batch_wins() {
        let (gate, seen) = counting_gate();
        for frame in [
            batch(&[]),
            batch(&[]),
            batch(&["A", "B"]),
            batch(&["C"]),
        ] {
            gate.on_detection_batch(&frame);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["A".to_string()]);
        assert!(gate.consumed());
    }

    #[test]
    fn empty_batches_never_fire() {
        let (gate, seen) = counting_gate();
        for _ in 0..10 {
            gate.on_detection_batch(&batch(&[]));
        }
        assert!(seen.lock().unwrap().is_empty());
        assert!(!gate.consumed());
    }

    #[test]
    fn release_is_a_no_op() {
        let (gate, seen) = counting_gate();
        gate.release();
        gate.on_detection_batch(&batch(&["A"]));
        gate.release();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_batches_fire_at_most_once() {
        let (gate, seen) = counting_gate();
        let mut workers = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            workers.push(thread::spawn(move || {
                for _ in 0..100 {
                    gate.on_detection_batch(&batch(&["X"]));
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(gate.consumed());
    }

    #[test]
    fn detector_without_processor_drops_batches() {
        let detector = BarcodeDetector::build();
        detector.deliver(&batch(&["A"]));
    }

    #[test]
    fn detector_routes_batches_to_processor() {
        let detector = BarcodeDetector::build();
        let (gate, seen) = counting_gate();
        detector.set_processor(gate);
        detector.deliver(&batch(&[]));
        detector.deliver(&batch(&["12345"]));
        assert_eq!(*seen.lock().unwrap(), vec!["12345".to_string()]);
    }

    /// Renders a QR code into a greyscale frame with a quiet zone, the way
    /// the camera hands frames to the detector.
    fn qr_frame(text: &str) -> GrayImage {
        const SCALE: u32 = 8;
        const QUIET: u32 = 4;

        let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let size = (modules + 2 * QUIET) * SCALE;
        let mut frame = GrayImage::from_pixel(size, size, image::Luma([255]));
        for y in 0..modules {
            for x in 0..modules {
                if colors[(y * modules + x) as usize] == qrcode::Color::Dark {
                    for dy in 0..SCALE {
                        for dx in 0..SCALE {
                            frame.put_pixel(
                                (QUIET + x) * SCALE + dx,
                                (QUIET + y) * SCALE + dy,
                                image::Luma([0]),
                            );
                        }
                    }
                }
            }
        }
        frame
    }

    #[test]
    fn rendered_code_decodes_to_its_text() {
        let detector = BarcodeDetector::build();
        let (tx, rx) = channel();
        struct Tap(Mutex<std::sync::mpsc::Sender<Vec<DecodedCandidate>>>);
        impl DetectionProcessor for Tap {
            fn on_detection_batch(&self, batch: &[DecodedCandidate]) {
                let _ = self.0.lock().unwrap().send(batch.to_vec());
            }
        }
        detector.set_processor(Arc::new(Tap(Mutex::new(tx))));

        detector.process_frame(&qr_frame("12345"));
        let decoded = rx.recv().unwrap();
        assert_eq!(
            decoded,
            vec![DecodedCandidate {
                display_value: "12345".to_string()
            }]
        );
    }

    #[test]
    fn blank_frame_delivers_empty_batch() {
        let detector = BarcodeDetector::build();
        let (tx, rx) = channel();
        struct Tap(Mutex<std::sync::mpsc::Sender<usize>>);
        impl DetectionProcessor for Tap {
            fn on_detection_batch(&self, batch: &[DecodedCandidate]) {
                let _ = self.0.lock().unwrap().send(batch.len());
            }
        }
        detector.set_processor(Arc::new(Tap(Mutex::new(tx))));

        detector.process_frame(&GrayImage::from_pixel(64, 64, image::Luma([255])));
        assert_eq!(rx.recv().unwrap(), 0);
    }
}
