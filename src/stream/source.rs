//! Vendor-facing stream boundary.
//!
//! The flight-controller SDK delivers compressed video through a C-style push
//! API: the caller registers a `(function pointer, opaque context)` pair and
//! the SDK invokes it once per chunk from a thread it owns. This module
//! defines that boundary as Rust types: the [`StreamSource`] trait a camera
//! endpoint implements, the [`StreamSink`] capability handed to it at start,
//! and the borrowed [`FrameView`] a frame handler receives.
//!
//! Nothing here owns buffers. A delivered chunk is only valid for the
//! duration of one callback invocation; `FrameView`'s lifetime parameter
//! makes retaining it past that point a compile error.

use std::ffi::c_void;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced by stream lifecycle operations.
///
/// All of these are local to the operation that produced them; none are
/// fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The vehicle handle is gone or it exposes no camera sub-resource.
    #[error("stream source unavailable (vehicle or camera not initialized)")]
    UnavailableSource,
    /// The source rejected the push-stream start request.
    #[error("stream source rejected the start request")]
    StartFailed,
    /// A delivery carried a context that does not map to a live controller.
    #[error("stream context {0:#x} does not resolve to a live controller")]
    ContextResolutionFailed(u64),
}

/// Raw delivery entry point, shaped like the vendor SDK's frame callback.
///
/// # Safety
///
/// Callers must pass a `data` pointer valid for `len` readable bytes for the
/// duration of the call, and the `user_data` value exactly as registered via
/// [`StreamSource::start_push_stream`]. The callee treats `user_data` as
/// untrusted and never dereferences it.
pub type RawStreamCallback = unsafe extern "C" fn(data: *const u8, len: usize, user_data: *mut c_void);

/// The `(callback, context)` capability registered with a stream source.
///
/// The context is an opaque integer-encoded controller identity, not a
/// pointer into controller memory, so a source holding a stale sink can at
/// worst trigger a failed lookup on delivery.
#[derive(Debug, Clone, Copy)]
pub struct StreamSink {
    /// Entry point the source invokes once per delivered chunk.
    pub callback: RawStreamCallback,
    /// Opaque value passed back verbatim on every invocation.
    pub user_data: *mut c_void,
}

// SAFETY: `user_data` is an integer-encoded identity, never a live pointer,
// so the sink may move freely across the source's threads.
unsafe impl Send for StreamSink {}
unsafe impl Sync for StreamSink {}

impl StreamSink {
    /// Builds a sink from an entry point and its opaque context.
    pub fn new(callback: RawStreamCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data,
        }
    }

    /// Invokes the entry point with one chunk, as a source's delivery thread
    /// would.
    ///
    /// The buffer only needs to stay valid for the duration of the call.
    pub fn deliver(&self, data: &[u8]) {
        // SAFETY: `data` is a live slice for the whole call, which is exactly
        // the validity window the callback contract requires; `user_data` is
        // forwarded verbatim from registration.
        unsafe { (self.callback)(data.as_ptr(), data.len(), self.user_data) }
    }
}

/// Selector for which camera feed a stream subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamView {
    /// The airframe's main gimbal camera.
    #[default]
    MainCamera,
    /// The forward-facing pilot camera.
    FpvCamera,
}

impl fmt::Display for StreamView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamView::MainCamera => write!(f, "main"),
            StreamView::FpvCamera => write!(f, "fpv"),
        }
    }
}

impl FromStr for StreamView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(StreamView::MainCamera),
            "fpv" => Ok(StreamView::FpvCamera),
            other => Err(format!(
                "unknown stream view '{other}'; expected 'main' or 'fpv'"
            )),
        }
    }
}

/// A read-only view of one delivered stream chunk.
///
/// The underlying buffer belongs to the source and is valid only until the
/// delivery entry point returns; copy out whatever must outlive the call.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    data: &'a [u8],
    sequence: u64,
}

impl<'a> FrameView<'a> {
    pub(crate) fn new(data: &'a [u8], sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// The chunk payload.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 1-based delivery sequence number within the controller's lifetime.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A camera-side push-stream endpoint.
///
/// Implementations wrap whatever the vendor SDK exposes. The contract mirrors
/// the C API's shape: view selection applies synchronously and cannot fail,
/// start returns a bare success flag, stop is fire-and-forget. A stop is not
/// guaranteed to be synchronous; one or two deliveries may still arrive after
/// it returns, and callers must stay safe against that.
pub trait StreamSource: Send + Sync {
    /// Selects which camera feed subsequent starts subscribe to.
    fn set_stream_view(&self, view: StreamView);

    /// Registers the sink and asks the source to begin push delivery.
    ///
    /// Returning `true` means the source accepted the request and will invoke
    /// the sink from a thread it owns until stopped. Returning `false` means
    /// no delivery will occur and the registration is discarded.
    fn start_push_stream(&self, sink: StreamSink) -> bool;

    /// Asks the source to halt delivery.
    ///
    /// Implementations must tolerate repeated stop requests.
    fn stop_push_stream(&self);
}
