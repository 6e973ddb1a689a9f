//! Push-stream lifecycle controller.
//!
//! [`StreamController`] owns the activation state of exactly one logical
//! video stream. `start` registers the shared delivery trampoline with the
//! camera endpoint and flips the controller active on acceptance; `stop`
//! halts delivery and always leaves the controller inactive; frames arrive
//! asynchronously on the source's thread and are forwarded to the
//! caller-supplied handler.
//!
//! Teardown discipline: the registry holds only a weak reference to the
//! controller's shared state, and every in-flight delivery upgrades it to a
//! strong one for the duration of that single invocation. Dropping a
//! controller therefore never frees memory a delivery is still reading, and
//! once the id is unregistered no future delivery can resolve it. A frame or
//! two arriving after a logical stop is processed best-effort, never an
//! error.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::registry::{self, ControllerId};
use super::source::{FrameView, StreamError, StreamSink, StreamView};
use crate::vehicle::Vehicle;

/// Application-side frame handler.
///
/// Runs on the source's delivery thread: copy out what must outlive the
/// call, return promptly, and let panics stop at the delivery boundary
/// (they are caught and logged, never propagated into the source).
pub type FrameHandler = Box<dyn FnMut(FrameView<'_>) + Send>;

/// State shared between a controller, the registry, and in-flight
/// deliveries.
pub(crate) struct ControllerShared {
    id: ControllerId,
    active: AtomicBool,
    frames: AtomicU64,
    bytes: AtomicU64,
    handler: Mutex<FrameHandler>,
}

impl ControllerShared {
    pub(crate) fn new(id: ControllerId, handler: FrameHandler) -> Self {
        Self {
            id,
            active: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            handler: Mutex::new(handler),
        }
    }

    /// Runs the handler for one delivered chunk. Never unwinds.
    fn deliver(&self, data: &[u8]) {
        let sequence = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
        let view = FrameView::new(data, sequence);
        let mut handler = self.handler.lock();
        if catch_unwind(AssertUnwindSafe(|| (*handler)(view))).is_err() {
            error!(
                controller = %self.id,
                sequence,
                "frame handler panicked; chunk dropped"
            );
        }
    }
}

/// Delivery entry point registered with stream sources.
///
/// # Safety
///
/// - `data` must point to `len` readable bytes for the duration of the call.
/// - `user_data` must be passed back verbatim from registration; it is
///   treated as untrusted and resolved through the controller registry, so a
///   stale or foreign value is reported and dropped, never dereferenced.
pub(crate) unsafe extern "C" fn deliver_stream_chunk(
    data: *const u8,
    len: usize,
    user_data: *mut c_void,
) {
    if data.is_null() {
        error!("stream delivery carried a null data pointer; chunk dropped");
        return;
    }
    let shared = match registry::resolve(user_data) {
        Ok(shared) => shared,
        Err(e) => {
            error!(error = %e, "stream delivery dropped");
            return;
        }
    };
    // SAFETY: the caller guarantees `data` is valid for `len` bytes until
    // this function returns, and the slice never outlives the call.
    let chunk = std::slice::from_raw_parts(data, len);
    shared.deliver(chunk);
}

/// Owns the activation state of exactly one logical video stream.
///
/// The controller borrows the vehicle rather than owning it: a dropped
/// vehicle reads as an unavailable source, never a dangling pointer. `start`
/// and `stop` are idempotent and may be called repeatedly; frame delivery is
/// asynchronous and forwarded to the handler supplied at construction.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use skyfeed::stream::{StreamController, StreamView};
/// use skyfeed::vehicle::{mock::MockVehicle, Vehicle};
///
/// let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::new());
/// let controller = StreamController::new(Arc::downgrade(&vehicle), StreamView::MainCamera);
/// controller.start()?;
/// assert!(controller.is_active());
/// controller.stop();
/// # Ok::<(), skyfeed::stream::StreamError>(())
/// ```
pub struct StreamController {
    vehicle: Weak<dyn Vehicle>,
    view: StreamView,
    shared: Arc<ControllerShared>,
    // Serializes start/stop so the lifecycle never interleaves with itself.
    lifecycle: Mutex<()>,
}

impl StreamController {
    /// Creates a controller whose handler logs each delivered chunk at debug
    /// level.
    pub fn new(vehicle: Weak<dyn Vehicle>, view: StreamView) -> Self {
        Self::with_handler(vehicle, view, |frame: FrameView<'_>| {
            debug!(
                sequence = frame.sequence(),
                len = frame.len(),
                "camera stream chunk received"
            );
        })
    }

    /// Creates a controller that forwards delivered chunks to `handler`.
    ///
    /// See [`FrameHandler`] for the handler contract.
    pub fn with_handler<F>(vehicle: Weak<dyn Vehicle>, view: StreamView, handler: F) -> Self
    where
        F: FnMut(FrameView<'_>) + Send + 'static,
    {
        let id = registry::next_id();
        let shared = Arc::new(ControllerShared::new(id, Box::new(handler)));
        registry::insert(id, &shared);
        Self {
            vehicle,
            view,
            shared,
            lifecycle: Mutex::new(()),
        }
    }

    /// Stable identity of this controller, as encoded into the opaque
    /// context registered with the source.
    pub fn id(&self) -> ControllerId {
        self.shared.id
    }

    /// Whether the stream is currently active. Pure read, no side effects.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Chunks delivered over this controller's lifetime.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }

    /// Payload bytes delivered over this controller's lifetime.
    pub fn bytes_delivered(&self) -> u64 {
        self.shared.bytes.load(Ordering::SeqCst)
    }

    /// Starts push delivery from the camera endpoint.
    ///
    /// Fails with [`StreamError::UnavailableSource`] when the vehicle handle
    /// is gone or exposes no camera, without touching the activation state.
    /// Starting an already-active stream is a success and a no-op. Otherwise
    /// the view selector is applied, the delivery sink is registered, and the
    /// controller becomes active exactly when the source accepts the request.
    pub fn start(&self) -> Result<(), StreamError> {
        let _lifecycle = self.lifecycle.lock();
        let Some(vehicle) = self.vehicle.upgrade() else {
            warn!(controller = %self.shared.id, "cannot start stream: vehicle handle is gone");
            return Err(StreamError::UnavailableSource);
        };
        let Some(camera) = vehicle.camera() else {
            warn!(controller = %self.shared.id, "cannot start stream: vehicle exposes no camera");
            return Err(StreamError::UnavailableSource);
        };
        if self.is_active() {
            info!(controller = %self.shared.id, "stream already active");
            return Ok(());
        }

        camera.set_stream_view(self.view);
        let sink = StreamSink::new(deliver_stream_chunk, self.shared.id.as_user_data());
        if camera.start_push_stream(sink) {
            self.shared.active.store(true, Ordering::SeqCst);
            info!(controller = %self.shared.id, view = %self.view, "camera stream started");
            Ok(())
        } else {
            error!(controller = %self.shared.id, "stream source rejected the start request");
            Err(StreamError::StartFailed)
        }
    }

    /// Stops push delivery.
    ///
    /// A no-op when not active. The activation flag is cleared
    /// unconditionally: even when the vehicle or camera has become
    /// unreachable, the stream is treated as already stopped rather than
    /// leaving a controller that believes itself active with a dangling
    /// registration.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_active() {
            debug!(controller = %self.shared.id, "stop requested but stream is not active");
            return;
        }
        self.shared.active.store(false, Ordering::SeqCst);

        let Some(vehicle) = self.vehicle.upgrade() else {
            warn!(controller = %self.shared.id, "vehicle handle is gone; stream treated as stopped");
            return;
        };
        let Some(camera) = vehicle.camera() else {
            warn!(controller = %self.shared.id, "vehicle exposes no camera; stream treated as stopped");
            return;
        };
        camera.stop_push_stream();
        info!(controller = %self.shared.id, "camera stream stopped");
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if self.is_active() {
            self.stop();
        }
        registry::unregister(self.shared.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::mock::{MockCamera, MockVehicle};
    use serial_test::serial;
    use tracing_test::traced_test;

    fn handle(vehicle: &Arc<dyn Vehicle>) -> Weak<dyn Vehicle> {
        Arc::downgrade(vehicle)
    }

    fn vehicle_with(camera: Arc<MockCamera>) -> Arc<dyn Vehicle> {
        Arc::new(MockVehicle::with_camera(camera))
    }

    #[test]
    fn new_controller_is_inactive() {
        let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::new());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
        assert!(!controller.is_active());
        assert_eq!(controller.frames_delivered(), 0);
    }

    #[test]
    fn start_fails_when_vehicle_is_gone() {
        let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::new());
        let weak = handle(&vehicle);
        drop(vehicle);
        let controller = StreamController::new(weak, StreamView::MainCamera);
        assert_eq!(controller.start(), Err(StreamError::UnavailableSource));
        assert!(!controller.is_active());
    }

    #[test]
    fn start_fails_when_vehicle_has_no_camera() {
        let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::without_camera());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
        assert_eq!(controller.start(), Err(StreamError::UnavailableSource));
        assert!(!controller.is_active());
    }

    #[test]
    fn rejected_start_leaves_inactive_and_never_stops_the_source() {
        let camera = Arc::new(MockCamera::manual());
        camera.set_fail_next_start();
        let vehicle = vehicle_with(camera.clone());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);

        assert_eq!(controller.start(), Err(StreamError::StartFailed));
        assert!(!controller.is_active());
        controller.stop();
        assert_eq!(camera.stop_calls(), 0);
    }

    #[test]
    fn lifecycle_folds_like_the_state_machine() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);

        assert!(controller.start().is_ok());
        assert!(controller.start().is_ok()); // idempotent, no second registration
        assert!(controller.is_active());
        assert_eq!(camera.start_calls(), 1);

        controller.stop();
        controller.stop();
        assert!(!controller.is_active());
        assert_eq!(camera.stop_calls(), 1);

        assert!(controller.start().is_ok());
        assert!(controller.is_active());
        assert_eq!(camera.start_calls(), 2);
    }

    #[test]
    fn view_selection_is_applied_before_start() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        let controller = StreamController::new(handle(&vehicle), StreamView::FpvCamera);
        assert!(controller.start().is_ok());
        assert_eq!(camera.selected_view(), Some(StreamView::FpvCamera));
        assert_eq!(camera.view_calls(), 1);
    }

    #[test]
    fn delivered_chunks_reach_the_handler_in_order() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        let seen: Arc<Mutex<Vec<(u64, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = seen.clone();
        let controller = StreamController::with_handler(
            handle(&vehicle),
            StreamView::MainCamera,
            move |frame: FrameView<'_>| {
                sink_log.lock().push((frame.sequence(), frame.len()));
            },
        );

        assert!(controller.start().is_ok());
        assert!(camera.push_chunk(&[0, 0, 0, 1, 0x41]));
        assert!(camera.push_chunk(&[0, 0, 0, 1]));
        assert_eq!(controller.frames_delivered(), 2);
        assert_eq!(controller.bytes_delivered(), 9);
        assert_eq!(*seen.lock(), vec![(1, 5), (2, 4)]);
    }

    #[test]
    fn null_data_pointer_is_dropped_without_reaching_the_handler() {
        let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::new());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
        // SAFETY (test): a null data pointer is exactly the case the entry
        // point must reject before building a slice.
        unsafe { deliver_stream_chunk(std::ptr::null(), 16, controller.id().as_user_data()) };
        assert_eq!(controller.frames_delivered(), 0);
    }

    #[test]
    #[traced_test]
    #[serial]
    fn stale_context_is_reported_once_per_frame() {
        let before = registry::unresolved_context_reports();
        let vehicle: Arc<dyn Vehicle> = Arc::new(MockVehicle::new());
        let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
        let stale = controller.id().as_user_data();
        drop(controller);

        let payload = [0u8, 0, 0, 1, 0x67];
        // SAFETY (test): valid buffer, stale context; must be dropped and
        // reported, never dereferenced.
        unsafe { deliver_stream_chunk(payload.as_ptr(), payload.len(), stale) };
        assert_eq!(registry::unresolved_context_reports(), before + 1);
        assert!(logs_contain("does not resolve to a live controller"));
    }

    #[test]
    fn handler_panic_is_contained_and_delivery_continues() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        let controller = StreamController::with_handler(
            handle(&vehicle),
            StreamView::MainCamera,
            move |frame: FrameView<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                if frame.sequence() == 1 {
                    panic!("handler failure on first chunk");
                }
            },
        );

        assert!(controller.start().is_ok());
        assert!(camera.push_chunk(&[1, 2, 3]));
        assert!(camera.push_chunk(&[4, 5, 6]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(controller.frames_delivered(), 2);
    }

    #[test]
    fn dropping_an_active_controller_stops_the_source_exactly_once() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        {
            let controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
            assert!(controller.start().is_ok());
        }
        assert_eq!(camera.stop_calls(), 1);
    }

    #[test]
    fn dropping_an_inactive_controller_never_touches_the_source() {
        let camera = Arc::new(MockCamera::manual());
        let vehicle = vehicle_with(camera.clone());
        {
            let _controller = StreamController::new(handle(&vehicle), StreamView::MainCamera);
        }
        assert_eq!(camera.stop_calls(), 0);
    }
}
