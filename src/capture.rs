//! The boundary to the camera capture backend. The real backend (V4L2 or
//! the CSI stack) lives outside this crate; the orchestration layer only
//! sees these traits. Closing a device is dropping its source.

use crate::camera::Frame;
use std::fmt;

/// What bus a camera hangs off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    /// A UVC webcam on a numbered `/dev/video` index.
    Usb,
    /// A ribbon camera on one of the board's CSI ports.
    Csi,
}

/// One camera attachment point on the board. The `tag` names the camera in
/// snapshot filenames and stream keys; for the CSI cameras it encodes the
/// mount angle ("CSI90", "CSI45") rather than the port number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSlot {
    /// The bus the camera hangs off of.
    pub kind: CameraKind,
    /// Index on that bus.
    pub index: u32,
    /// Name used in filenames and stream keys.
    pub tag: String,
}

impl CameraSlot {
    /// A USB slot tagged `USB<index>`.
    pub fn usb(index: u32) -> Self {
        CameraSlot {
            kind: CameraKind::Usb,
            index,
            tag: format!("USB{}", index),
        }
    }

    /// A CSI slot with an explicit tag.
    pub fn csi(index: u32, tag: &str) -> Self {
        CameraSlot {
            kind: CameraKind::Csi,
            index,
            tag: tag.to_string(),
        }
    }
}

/// The installation's stock probe list: `usb` USB indices plus the two CSI
/// ports, tagged by how their cameras are mounted.
pub fn default_slots(usb: u32, csi: u32) -> Vec<CameraSlot> {
    let mut slots: Vec<CameraSlot> = (0..usb).map(CameraSlot::usb).collect();
    for i in 0..csi {
        let tag = match i {
            0 => "CSI90".to_string(),
            1 => "CSI45".to_string(),
            other => format!("CSI{}", other),
        };
        slots.push(CameraSlot::csi(i, &tag));
    }
    slots
}

/// Errors a capture backend can hand back across the boundary.
#[derive(Debug)]
pub enum CaptureError {
    /// The device did not open, or produced no probe frame. Reported once;
    /// the slot is treated as absent for the rest of the run.
    DeviceUnavailable(String),
    /// A single frame read failed. The worker retries these forever.
    ReadFailed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(why) => write!(f, "device unavailable: {}", why),
            CaptureError::ReadFailed(why) => write!(f, "frame read failed: {}", why),
        }
    }
}

impl std::error::Error for CaptureError {}

/// An opened camera. Dropping the source releases the device.
pub trait CaptureSource: Send {
    /// Blocks for the next frame, already converted to the canonical RGB8
    /// layout of [`Frame`].
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Factory for capture sources, probed once per slot at startup.
pub trait CaptureBackend {
    /// Opens the device at `slot`, validating that it can actually produce
    /// a frame.
    fn open(&self, slot: &CameraSlot) -> Result<Box<dyn CaptureSource>, CaptureError>;
}
