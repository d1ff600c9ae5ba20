//! Per-step snapshot capture: read whatever each camera has right now,
//! crop it per policy, persist it, and publish the set once at the end of
//! a full run. Capture only has to observe "now" -- the sequencer pauses
//! before calling in, which is all the synchronization the installation
//! needs.

use crate::camera::{Frame, FrameCache};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a snapshot ends up once captured. The real target is a folder on
/// disk; tests substitute their own.
pub trait ImageStorage: Send {
    /// Persists one cropped frame under `name`.
    fn save_image(&mut self, name: &str, frame: &Frame) -> Result<(), StorageError>;
}

/// The one-shot external sync step that runs after a complete sequence.
pub trait SyncPublisher: Send {
    /// Pushes the finished snapshot set wherever it goes.
    fn publish(&mut self) -> Result<(), SyncError>;
}

/// Errors from persisting a snapshot.
#[derive(Debug)]
pub enum StorageError {
    /// The frame buffer did not match its stated dimensions.
    MalformedFrame,
    /// Filesystem trouble.
    Io(std::io::Error),
    /// Encoding trouble.
    Image(image::ImageError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::MalformedFrame => write!(f, "frame buffer does not match dimensions"),
            StorageError::Io(e) => write!(f, "io error: {}", e),
            StorageError::Image(e) => write!(f, "image error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors from the external sync step.
#[derive(Debug)]
pub struct SyncError(pub String);

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sync error: {}", self.0)
    }
}

impl std::error::Error for SyncError {}

/// Fractional trims applied to a frame before it is persisted. Each field
/// is in `0..=1` and measured from its own edge, so `top: 0.3` discards
/// the upper 30% of the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropPolicy {
    /// Fraction trimmed off the top.
    pub top: f32,
    /// Fraction trimmed off the bottom.
    pub bottom: f32,
    /// Fraction trimmed off the left.
    pub left: f32,
    /// Fraction trimmed off the right.
    pub right: f32,
}

impl CropPolicy {
    /// Saves the frame as-is.
    pub const NONE: CropPolicy = CropPolicy {
        top: 0.0,
        bottom: 0.0,
        left: 0.0,
        right: 0.0,
    };

    /// Applies the trims, returning the cropped frame. Trims that would
    /// leave nothing fall back to the uncropped frame.
    pub fn apply(&self, frame: &Frame) -> Frame {
        let w = frame.width as usize;
        let h = frame.height as usize;
        let x0 = (self.left * w as f32) as usize;
        let x1 = w.saturating_sub((self.right * w as f32) as usize);
        let y0 = (self.top * h as f32) as usize;
        let y1 = h.saturating_sub((self.bottom * h as f32) as usize);
        let (x0, x1) = if x0 < x1 { (x0, x1) } else { (0, w) };
        let (y0, y1) = if y0 < y1 { (y0, y1) } else { (0, h) };
        let mut pixels = Vec::with_capacity((x1 - x0) * (y1 - y0) * 3);
        for y in y0..y1 {
            let row = y * w * 3;
            pixels.extend_from_slice(&frame.pixels[row + x0 * 3..row + x1 * 3]);
        }
        Frame {
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            pixels,
            captured_at: frame.captured_at,
        }
    }
}

/// The leading letters of a camera tag; `USB3` and `USB0` share the `USB`
/// category and therefore the same default crop.
fn category(tag: &str) -> &str {
    let end = tag
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(tag.len());
    &tag[..end]
}

/// The installation's stock crop presets, keyed by tag or tag category.
/// USB cameras lose the top 30% and 15% per side (they see the table
/// frame); the 45-degree CSI camera loses the bottom 30% and 10% per
/// side; everything else saves uncropped.
pub fn default_policies() -> HashMap<String, CropPolicy> {
    let mut policies = HashMap::new();
    policies.insert(
        "USB".to_string(),
        CropPolicy {
            top: 0.3,
            bottom: 0.0,
            left: 0.15,
            right: 0.15,
        },
    );
    policies.insert(
        "CSI45".to_string(),
        CropPolicy {
            top: 0.0,
            bottom: 0.3,
            left: 0.1,
            right: 0.1,
        },
    );
    policies
}

/// Errors loading a crop-policy file.
#[derive(Debug)]
pub enum PolicyError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file did not parse as a RON policy map.
    Parse(ron::de::SpannedError),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PolicyError::Io(e) => write!(f, "io error: {}", e),
            PolicyError::Parse(e) => write!(f, "ron error: {}", e),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Loads a crop-policy map from a RON file, e.g.
/// `{"USB": (top: 0.3, bottom: 0.0, left: 0.15, right: 0.15)}`.
pub fn load_policies(path: &Path) -> Result<HashMap<String, CropPolicy>, PolicyError> {
    let text = fs::read_to_string(path).map_err(PolicyError::Io)?;
    ron::from_str(&text).map_err(PolicyError::Parse)
}

/// Reads current frames across cameras, crops, names, and persists them,
/// one set per servo step. Cameras fail independently: a camera without a
/// frame is skipped and the rest of the set still lands.
pub struct SnapshotCorrelator {
    cameras: Vec<(String, FrameCache)>,
    policies: HashMap<String, CropPolicy>,
    storage: Box<dyn ImageStorage>,
    publisher: Box<dyn SyncPublisher>,
}

impl SnapshotCorrelator {
    /// A correlator over `cameras` (tag, cache pairs) with the given crop
    /// policies, storage, and sync step.
    pub fn new(
        cameras: Vec<(String, FrameCache)>,
        policies: HashMap<String, CropPolicy>,
        storage: Box<dyn ImageStorage>,
        publisher: Box<dyn SyncPublisher>,
    ) -> Self {
        SnapshotCorrelator {
            cameras,
            policies,
            storage,
            publisher,
        }
    }

    /// Captures one snapshot set for `step`, named `{tag}_{step}.jpg`.
    /// Per-file persist failures are logged and never abort the set.
    pub fn capture(&mut self, step: u32) {
        for (tag, cache) in &self.cameras {
            let Some(frame) = cache.latest() else {
                debug!("{}: no frame yet, skipping", tag);
                continue;
            };
            let policy = self
                .policies
                .get(tag)
                .or_else(|| self.policies.get(category(tag)))
                .copied()
                .unwrap_or(CropPolicy::NONE);
            let cropped = policy.apply(&frame);
            let name = format!("{}_{}.jpg", tag, step);
            if let Err(e) = self.storage.save_image(&name, &cropped) {
                warn!("failed to save {}: {}", name, e);
            }
        }
    }

    /// Runs the external sync step. Called exactly once per full,
    /// uncancelled sequence; failures are logged and absorbed.
    pub fn publish(&mut self) {
        if let Err(e) = self.publisher.publish() {
            warn!("{}", e);
        }
    }
}

/// Writes snapshots as JPEGs into one flat folder, created on first use.
pub struct FsImageStorage {
    dir: PathBuf,
    created: bool,
}

impl FsImageStorage {
    /// Storage rooted at `dir`; the folder is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsImageStorage {
            dir: dir.into(),
            created: false,
        }
    }
}

impl ImageStorage for FsImageStorage {
    fn save_image(&mut self, name: &str, frame: &Frame) -> Result<(), StorageError> {
        if !self.created {
            fs::create_dir_all(&self.dir).map_err(StorageError::Io)?;
            self.created = true;
        }
        let img = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or(StorageError::MalformedFrame)?;
        img.save(self.dir.join(name)).map_err(StorageError::Image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x % 256) as u8);
                pixels.push((y % 256) as u8);
                pixels.push(0);
            }
        }
        Frame::new(width, height, pixels)
    }

    /// Records saved names; can be told to reject certain names.
    struct RecordingStorage {
        saved: Arc<Mutex<Vec<String>>>,
        reject: Option<String>,
    }

    impl ImageStorage for RecordingStorage {
        fn save_image(&mut self, name: &str, _frame: &Frame) -> Result<(), StorageError> {
            if self.reject.as_deref() == Some(name) {
                return Err(StorageError::MalformedFrame);
            }
            self.saved.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct CountingPublisher {
        calls: Arc<Mutex<u32>>,
    }

    impl SyncPublisher for CountingPublisher {
        fn publish(&mut self) -> Result<(), SyncError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn crop_trims_the_right_fractions() {
        let frame = gradient_frame(100, 50);
        let policy = CropPolicy {
            top: 0.3,
            bottom: 0.0,
            left: 0.15,
            right: 0.15,
        };
        let cropped = policy.apply(&frame);
        assert_eq!(cropped.width, 70);
        assert_eq!(cropped.height, 35);
        // first pixel of the crop comes from (15, 15) in the source
        assert_eq!(cropped.pixels[0], 15);
        assert_eq!(cropped.pixels[1], 15);
        assert_eq!(
            cropped.pixels.len(),
            cropped.width as usize * cropped.height as usize * 3
        );
    }

    #[test]
    fn degenerate_crop_falls_back_to_uncropped() {
        let frame = gradient_frame(10, 10);
        let policy = CropPolicy {
            top: 0.9,
            bottom: 0.9,
            left: 0.0,
            right: 0.0,
        };
        let cropped = policy.apply(&frame);
        assert_eq!(cropped.height, 10);
    }

    #[test]
    fn category_strips_trailing_digits() {
        assert_eq!(category("USB3"), "USB");
        assert_eq!(category("CSI45"), "CSI");
        assert_eq!(category("weird"), "weird");
    }

    #[test]
    fn missing_camera_never_blocks_the_others() {
        let with_frame = FrameCache::new();
        with_frame.store(gradient_frame(16, 16));
        let without_frame = FrameCache::new();
        let saved = Arc::new(Mutex::new(Vec::new()));
        let mut correlator = SnapshotCorrelator::new(
            vec![
                ("CSI90".to_string(), without_frame),
                ("USB0".to_string(), with_frame),
            ],
            default_policies(),
            Box::new(RecordingStorage {
                saved: saved.clone(),
                reject: None,
            }),
            Box::new(CountingPublisher {
                calls: Arc::new(Mutex::new(0)),
            }),
        );
        correlator.capture(4);
        assert_eq!(*saved.lock().unwrap(), vec!["USB0_4.jpg".to_string()]);
    }

    #[test]
    fn per_file_failure_does_not_abort_the_set() {
        let cache_a = FrameCache::new();
        cache_a.store(gradient_frame(8, 8));
        let cache_b = FrameCache::new();
        cache_b.store(gradient_frame(8, 8));
        let saved = Arc::new(Mutex::new(Vec::new()));
        let mut correlator = SnapshotCorrelator::new(
            vec![
                ("CSI90".to_string(), cache_a),
                ("CSI45".to_string(), cache_b),
            ],
            default_policies(),
            Box::new(RecordingStorage {
                saved: saved.clone(),
                reject: Some("CSI90_1.jpg".to_string()),
            }),
            Box::new(CountingPublisher {
                calls: Arc::new(Mutex::new(0)),
            }),
        );
        correlator.capture(1);
        assert_eq!(*saved.lock().unwrap(), vec!["CSI45_1.jpg".to_string()]);
    }

    #[test]
    fn fs_storage_writes_a_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsImageStorage::new(dir.path().join("Color"));
        storage
            .save_image("USB0_1.jpg", &gradient_frame(32, 24))
            .unwrap();
        assert!(dir.path().join("Color").join("USB0_1.jpg").exists());
    }

    #[test]
    fn policy_file_round_trips_through_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crops.ron");
        let text = ron::to_string(&default_policies()).unwrap();
        fs::write(&path, text).unwrap();
        let loaded = load_policies(&path).unwrap();
        assert_eq!(loaded.get("USB"), default_policies().get("USB"));
    }
}
