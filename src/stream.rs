//! Read-only frame access for the streaming transport. The HTTP server
//! itself is not this crate's business: it polls [`StreamView::frame`] at
//! whatever cadence it likes and encodes what it gets, and a `None` just
//! means that camera has nothing yet.

use crate::camera::{CameraWorker, Frame, FrameCache};
use std::collections::HashMap;
use std::sync::Arc;

/// An explicit read-only view over the active cameras' caches. Cheap to
/// clone and hand to the transport thread; it can never start, stop, or
/// write anything.
#[derive(Debug, Clone, Default)]
pub struct StreamView {
    caches: Arc<HashMap<String, FrameCache>>,
}

impl StreamView {
    /// A view over the given workers, keyed by camera tag.
    pub fn new(workers: &[CameraWorker]) -> Self {
        let caches = workers
            .iter()
            .map(|worker| (worker.tag().to_string(), worker.cache()))
            .collect();
        StreamView {
            caches: Arc::new(caches),
        }
    }

    /// The camera keys this view serves, sorted for stable listings.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.caches.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The latest frame for `camera_key`: `None` for an unknown key or a
    /// camera that has not produced a frame yet. Never blocks beyond the
    /// cache swap.
    pub fn frame(&self, camera_key: &str) -> Option<Arc<Frame>> {
        self.caches.get(camera_key)?.latest()
    }
}
