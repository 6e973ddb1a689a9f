//! Mock vehicle and camera for tests and demos without hardware.
//!
//! [`MockCamera`] implements the vendor contract faithfully enough to
//! exercise every lifecycle path: it records the registered sink, honors
//! view selection, and can be driven chunk-by-chunk ([`MockCamera::manual`])
//! or from a background pacing thread ([`MockCamera::paced`]). Knobs inject
//! the awkward cases: a rejected start, and delivery that lingers after stop
//! the way a vendor stop with asynchronous semantics does.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use super::{AppCredentials, FirmwareVersion, Vehicle, VehicleError};
use crate::stream::{StreamSink, StreamSource, StreamView};

/// Chunks still delivered after a stop when lingering is enabled.
const LINGER_CHUNKS: usize = 2;

/// In-process stand-in for a flight controller.
pub struct MockVehicle {
    firmware: FirmwareVersion,
    activated: AtomicBool,
    link_down: AtomicBool,
    reject_code: Mutex<Option<u32>>,
    camera: Option<Arc<MockCamera>>,
}

impl MockVehicle {
    /// Rejection code used for malformed credentials.
    pub const REJECT_BAD_CREDENTIALS: u32 = 0x0001;

    /// A vehicle with a manually driven camera attached.
    pub fn new() -> Self {
        Self::with_camera(Arc::new(MockCamera::manual()))
    }

    /// A vehicle with the given camera attached.
    pub fn with_camera(camera: Arc<MockCamera>) -> Self {
        Self {
            firmware: FirmwareVersion::new(3, 4, 0, 0),
            activated: AtomicBool::new(false),
            link_down: AtomicBool::new(false),
            reject_code: Mutex::new(None),
            camera: Some(camera),
        }
    }

    /// A vehicle without any camera endpoint.
    pub fn without_camera() -> Self {
        Self {
            camera: None,
            ..Self::new()
        }
    }

    /// Simulates the serial link going down or coming back.
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::SeqCst);
    }

    /// Makes the next activation attempt fail with `code`.
    pub fn set_reject_activation(&self, code: u32) {
        *self.reject_code.lock() = Some(code);
    }

    /// Whether activation has succeeded.
    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }
}

impl Default for MockVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl Vehicle for MockVehicle {
    fn activate(&self, credentials: &AppCredentials) -> Result<(), VehicleError> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(VehicleError::LinkUnavailable);
        }
        if let Some(code) = self.reject_code.lock().take() {
            return Err(VehicleError::ActivationRejected { code });
        }
        if credentials.app_id == 0 || credentials.app_key.is_empty() {
            return Err(VehicleError::ActivationRejected {
                code: Self::REJECT_BAD_CREDENTIALS,
            });
        }
        self.activated.store(true, Ordering::SeqCst);
        debug!(app_id = credentials.app_id, "mock vehicle activated");
        Ok(())
    }

    fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.is_activated().then_some(self.firmware)
    }

    fn camera(&self) -> Option<&dyn StreamSource> {
        self.camera.as_deref().map(|camera| camera as &dyn StreamSource)
    }
}

#[derive(Default)]
struct CameraInner {
    sink: Option<StreamSink>,
    view: Option<StreamView>,
    worker: Option<JoinHandle<()>>,
    run: Option<Arc<AtomicBool>>,
}

/// In-process stand-in for the vendor camera endpoint.
pub struct MockCamera {
    inner: Mutex<CameraInner>,
    view_calls: AtomicU64,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    fail_next_start: AtomicBool,
    linger_after_stop: Arc<AtomicBool>,
    pace: Option<Duration>,
}

impl MockCamera {
    /// A camera driven explicitly through [`MockCamera::push_chunk`].
    pub fn manual() -> Self {
        Self {
            inner: Mutex::new(CameraInner::default()),
            view_calls: AtomicU64::new(0),
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            fail_next_start: AtomicBool::new(false),
            linger_after_stop: Arc::new(AtomicBool::new(false)),
            pace: None,
        }
    }

    /// A camera that delivers a random chunk every `period` from a
    /// background thread while started.
    pub fn paced(period: Duration) -> Self {
        Self {
            pace: Some(period),
            ..Self::manual()
        }
    }

    /// Makes the next start request fail. One-shot.
    pub fn set_fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Keeps delivering for a short tail after stop, simulating a vendor
    /// stop with asynchronous semantics. In manual mode the sink survives
    /// the stop instead.
    pub fn set_linger_after_stop(&self, linger: bool) {
        self.linger_after_stop.store(linger, Ordering::SeqCst);
    }

    /// View selections observed.
    pub fn view_calls(&self) -> u64 {
        self.view_calls.load(Ordering::SeqCst)
    }

    /// Start requests observed, accepted or not.
    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Stop requests observed.
    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// The most recently selected view, if any.
    pub fn selected_view(&self) -> Option<StreamView> {
        self.inner.lock().view
    }

    /// Delivers one chunk through the registered sink.
    ///
    /// Returns `false` when no sink is registered. The sink is copied out of
    /// the lock before delivery so a handler may call back into the camera.
    pub fn push_chunk(&self, data: &[u8]) -> bool {
        let sink = self.inner.lock().sink;
        match sink {
            Some(sink) => {
                sink.deliver(data);
                true
            }
            None => false,
        }
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::manual()
    }
}

impl StreamSource for MockCamera {
    fn set_stream_view(&self, view: StreamView) {
        self.view_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().view = Some(view);
    }

    fn start_push_stream(&self, sink: StreamSink) -> bool {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            debug!("mock camera rejecting start request");
            return false;
        }
        let mut inner = self.inner.lock();
        inner.sink = Some(sink);
        if let Some(period) = self.pace {
            let run = Arc::new(AtomicBool::new(true));
            let thread_run = run.clone();
            let linger = self.linger_after_stop.clone();
            inner.run = Some(run);
            inner.worker = Some(thread::spawn(move || {
                pump_chunks(sink, &thread_run, &linger, period);
            }));
        }
        true
    }

    fn stop_push_stream(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let worker = {
            let mut inner = self.inner.lock();
            if let Some(run) = inner.run.take() {
                run.store(false, Ordering::SeqCst);
            }
            if !self.linger_after_stop.load(Ordering::SeqCst) {
                inner.sink = None;
            }
            inner.worker.take()
        };
        // Join outside the lock so the pump can finish its linger tail.
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

fn pump_chunks(sink: StreamSink, run: &AtomicBool, linger: &AtomicBool, period: Duration) {
    let mut rng = rand::thread_rng();
    loop {
        thread::sleep(period);
        if !run.load(Ordering::SeqCst) {
            break;
        }
        sink.deliver(&next_chunk(&mut rng));
    }
    if linger.load(Ordering::SeqCst) {
        for _ in 0..LINGER_CHUNKS {
            thread::sleep(period);
            sink.deliver(&next_chunk(&mut rng));
        }
    }
}

/// A random payload stamped with an Annex B start code, like one slice of
/// an H.264 bitstream.
fn next_chunk(rng: &mut impl Rng) -> Vec<u8> {
    let len = rng.gen_range(512..=4096);
    let mut chunk = vec![0u8; len];
    rng.fill(&mut chunk[..]);
    chunk[..4].copy_from_slice(&[0, 0, 0, 1]);
    chunk
}
