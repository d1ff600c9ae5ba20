//! The latest-frame cache and the per-camera worker thread that feeds it.
//! Every probed camera gets its own thread so a slow or flaky device never
//! stalls the others or the streaming readers.

use crate::cancel::RunToken;
use crate::capture::{CameraSlot, CaptureBackend};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Backoff between retries after a failed frame read.
const READ_BACKOFF: Duration = Duration::from_millis(100);

/// A camera that keeps failing logs once per this many consecutive
/// failures, not once per attempt.
const READ_LOG_EVERY: u32 = 100;

/// One decoded camera frame in the canonical layout: RGB8, row-major, no
/// padding between rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGB8 bytes, `width * height * 3` of them.
    pub pixels: Vec<u8>,
    /// When the frame was decoded.
    pub captured_at: SystemTime,
}

impl Frame {
    /// Wraps a pixel buffer, stamping it with the current time. The buffer
    /// must hold `width * height * 3` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 3);
        Frame {
            width,
            height,
            pixels,
            captured_at: SystemTime::now(),
        }
    }
}

/// Holds the most recent frame from one camera. The single writer swaps a
/// new frame in, readers clone an [`Arc`] handle out; the lock is held only
/// for the swap either way, so a reader can never observe a half-written
/// frame and a slow reader never blocks the writer.
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl FrameCache {
    /// An empty cache.
    pub fn new() -> Self {
        FrameCache::default()
    }

    /// Replaces the cached frame.
    pub fn store(&self, frame: Frame) {
        *self.slot.lock().unwrap() = Some(Arc::new(frame));
    }

    /// The most recent complete frame, or `None` until the first one lands.
    /// Never blocks beyond the swap.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().unwrap().clone()
    }
}

/// Owns one camera: its slot identity, its cache, and the thread pulling
/// frames from the capture backend into the cache.
pub struct CameraWorker {
    slot: CameraSlot,
    cache: FrameCache,
    token: RunToken,
    handle: Option<JoinHandle<()>>,
}

impl CameraWorker {
    /// A worker for `slot` that has not opened anything yet.
    pub fn new(slot: CameraSlot) -> Self {
        CameraWorker {
            slot,
            cache: FrameCache::new(),
            token: RunToken::new(),
            handle: None,
        }
    }

    /// The camera tag, e.g. `USB0` or `CSI45`.
    pub fn tag(&self) -> &str {
        &self.slot.tag
    }

    /// A handle onto this camera's cache, for readers on other threads.
    pub fn cache(&self) -> FrameCache {
        self.cache.clone()
    }

    /// Opens the capture source and spawns the feed loop. Returns `false`
    /// when the device is unavailable, with the reason logged once; no
    /// error escapes past this boundary. A second call while running is a
    /// no-op that reports success.
    pub fn start(&mut self, backend: &dyn CaptureBackend) -> bool {
        if self.handle.is_some() {
            return true;
        }
        let mut source = match backend.open(&self.slot) {
            Ok(source) => source,
            Err(e) => {
                info!("{}: {}", self.slot.tag, e);
                return false;
            }
        };
        self.token = RunToken::new();
        let token = self.token.clone();
        let cache = self.cache.clone();
        let tag = self.slot.tag.clone();
        self.handle = Some(thread::spawn(move || {
            let mut failures: u32 = 0;
            while token.should_continue() {
                match source.read_frame() {
                    Ok(frame) => {
                        cache.store(frame);
                        failures = 0;
                    }
                    Err(e) => {
                        // Transient read failures never kill the worker;
                        // only stop() does.
                        failures += 1;
                        if failures % READ_LOG_EVERY == 1 {
                            warn!("{}: {} ({} consecutive failures)", tag, e, failures);
                        }
                        token.sleep_while_running(READ_BACKOFF);
                    }
                }
            }
            debug!("{}: worker stopped", tag);
        }));
        info!("{}: camera started", self.slot.tag);
        true
    }

    /// Stops the feed loop and joins it; the loop's source is dropped on
    /// its own thread, releasing the device. Safe to call twice, or when
    /// `start()` never succeeded.
    pub fn stop(&mut self) {
        self.token.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Probes every configured slot exactly once. Slots that fail to open are
/// left out of the returned set and nothing retries them later; a missing
/// camera just shrinks the installation.
pub fn probe_cameras(backend: &dyn CaptureBackend, slots: &[CameraSlot]) -> Vec<CameraWorker> {
    let mut workers = Vec::new();
    for slot in slots {
        let mut worker = CameraWorker::new(slot.clone());
        if worker.start(backend) {
            workers.push(worker);
        }
    }
    info!("{} of {} camera slots active", workers.len(), slots.len());
    workers
}
