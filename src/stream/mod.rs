//! Camera push-stream lifecycle and frame hand-off.
//!
//! The module splits along the trust boundary: [`StreamSource`] is the
//! vendor-facing camera endpoint, [`StreamSink`] the delivery capability
//! registered with it, and [`FrameView`] the borrowed per-chunk payload.
//! [`ControllerId`] and the registry recover controller identity from the
//! opaque context a source hands back with every chunk, and
//! [`StreamController`] is the lifecycle machine that ties the two worlds
//! together.

mod controller;
mod registry;
mod source;

pub use controller::{FrameHandler, StreamController};
pub use registry::{unresolved_context_reports, ControllerId};
pub use source::{FrameView, RawStreamCallback, StreamError, StreamSink, StreamSource, StreamView};
