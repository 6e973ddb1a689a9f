//! Checked resolution of opaque callback contexts.
//!
//! The context value registered with a stream source is never a pointer into
//! controller memory: it is a [`ControllerId`] encoded as a pointer-sized
//! integer. Each delivery resolves the id through a process-wide table of
//! weak references, so a stale or foreign context fails the lookup and is
//! reported instead of causing undefined access. The table holds `Weak`
//! entries only; it owns no controller state and cannot extend a
//! controller's lifetime on its own.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::controller::ControllerShared;
use super::source::StreamError;

/// Stable identity of a stream controller, independent of its address.
///
/// Ids are allocated from 1; zero is reserved so a null context can never
/// resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(u64);

impl ControllerId {
    /// Integer value, for diagnostics.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Encodes the id as the opaque context value handed to a source.
    pub(crate) fn as_user_data(&self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    pub(crate) fn from_user_data(user_data: *mut c_void) -> Self {
        Self(user_data as usize as u64)
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static ENTRIES: Lazy<Mutex<HashMap<u64, Weak<ControllerShared>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static UNRESOLVED: AtomicU64 = AtomicU64::new(0);

/// Allocates a fresh controller id.
pub(crate) fn next_id() -> ControllerId {
    ControllerId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
}

/// Publishes shared controller state under its id.
pub(crate) fn insert(id: ControllerId, shared: &Arc<ControllerShared>) {
    ENTRIES.lock().insert(id.0, Arc::downgrade(shared));
}

/// Removes the entry; deliveries carrying this id fail resolution from now
/// on.
pub(crate) fn unregister(id: ControllerId) {
    ENTRIES.lock().remove(&id.0);
}

/// Resolves a raw context back to live controller state.
///
/// The returned `Arc` keeps the shared state alive for the duration of the
/// in-flight delivery even if the controller is dropped concurrently.
/// Failure bumps the diagnostic counter; the caller reports and drops the
/// frame.
pub(crate) fn resolve(user_data: *mut c_void) -> Result<Arc<ControllerShared>, StreamError> {
    let id = ControllerId::from_user_data(user_data);
    let entry = ENTRIES.lock().get(&id.0).and_then(Weak::upgrade);
    match entry {
        Some(shared) => Ok(shared),
        None => {
            UNRESOLVED.fetch_add(1, Ordering::SeqCst);
            Err(StreamError::ContextResolutionFailed(id.0))
        }
    }
}

/// Number of deliveries whose context failed to resolve since process start.
///
/// Purely diagnostic; a non-zero value means some source kept delivering
/// after its controller was torn down.
pub fn unresolved_context_reports() -> u64 {
    UNRESOLVED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn fresh_shared(id: ControllerId) -> Arc<ControllerShared> {
        Arc::new(ControllerShared::new(id, Box::new(|_| {})))
    }

    #[test]
    fn ids_are_unique_and_nonzero() {
        let a = next_id();
        let b = next_id();
        assert_ne!(a, b);
        assert_ne!(a.get(), 0);
        assert_ne!(b.get(), 0);
    }

    #[test]
    fn id_round_trips_through_user_data() {
        let id = next_id();
        let raw = id.as_user_data();
        assert_eq!(ControllerId::from_user_data(raw), id);
    }

    #[test]
    fn registered_ids_resolve_to_the_same_state() {
        let id = next_id();
        let shared = fresh_shared(id);
        insert(id, &shared);
        let resolved = resolve(id.as_user_data()).expect("registered id must resolve");
        assert!(Arc::ptr_eq(&shared, &resolved));
        unregister(id);
    }

    #[test]
    #[serial]
    fn unregistered_ids_fail_resolution() {
        let id = next_id();
        let shared = fresh_shared(id);
        insert(id, &shared);
        unregister(id);
        let err = resolve(id.as_user_data()).err();
        assert_eq!(err, Some(StreamError::ContextResolutionFailed(id.get())));
    }

    #[test]
    #[serial]
    fn dropped_state_fails_resolution_even_while_registered() {
        let id = next_id();
        let shared = fresh_shared(id);
        insert(id, &shared);
        drop(shared);
        assert!(resolve(id.as_user_data()).is_err());
        unregister(id);
    }

    #[test]
    #[serial]
    fn failed_resolutions_are_counted() {
        let before = unresolved_context_reports();
        let id = next_id();
        assert!(resolve(id.as_user_data()).is_err());
        assert!(resolve(std::ptr::null_mut()).is_err());
        assert_eq!(unresolved_context_reports(), before + 2);
    }
}
