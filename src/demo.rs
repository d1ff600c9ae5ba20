//! Stand-in devices for bench runs on a desk, with no installation
//! hardware attached: a synthetic capture backend, strips and a servo that
//! only log, a button driven by stdin. Real deployments swap these for the
//! hardware drivers; the orchestration layer cannot tell the difference.

use crate::button::ButtonInput;
use crate::camera::Frame;
use crate::capture::{CameraKind, CameraSlot, CaptureBackend, CaptureError, CaptureSource};
use crate::display::{DisplayError, SlideshowScreen, StatusDisplay};
use crate::lights::{Rgb, StripDriver, StripError};
use crate::servo::ServoDriver;
use crate::snapshot::{SyncError, SyncPublisher};
use log::{debug, info};
use std::io::{self, BufRead};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Frame pacing of the synthetic cameras.
const SYNTHETIC_FRAME_TIME: Duration = Duration::from_millis(33);

/// Capture backend that fabricates moving gradient frames. Only USB slot 0
/// and the CSI slots "exist", so probing still exercises the
/// missing-camera path.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        SyntheticBackend {
            width: 320,
            height: 240,
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, slot: &CameraSlot) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if slot.kind == CameraKind::Usb && slot.index > 0 {
            return Err(CaptureError::DeviceUnavailable(
                "synthetic backend only populates USB slot 0".into(),
            ));
        }
        Ok(Box::new(SyntheticSource {
            width: self.width,
            height: self.height,
            phase: (slot.index * 64) as u8,
            frame_no: 0,
        }))
    }
}

struct SyntheticSource {
    width: u32,
    height: u32,
    phase: u8,
    frame_no: u32,
}

impl CaptureSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        thread::sleep(SYNTHETIC_FRAME_TIME);
        self.frame_no = self.frame_no.wrapping_add(1);
        let shift = (self.frame_no % 256) as u8;
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x % 256) as u8).wrapping_add(shift));
                pixels.push((y % 256) as u8);
                pixels.push(self.phase);
            }
        }
        Ok(Frame::new(self.width, self.height, pixels))
    }
}

/// A strip that keeps its pixel state in memory and logs each show.
pub struct ConsoleStrip {
    name: String,
    pixels: Vec<Rgb>,
    brightness: f32,
}

impl ConsoleStrip {
    /// A named strip of `len` pixels, all dark.
    pub fn new(name: &str, len: usize) -> Self {
        ConsoleStrip {
            name: name.to_string(),
            pixels: vec![Rgb::BLACK; len],
            brightness: 0.0,
        }
    }
}

impl StripDriver for ConsoleStrip {
    fn len(&self) -> usize {
        self.pixels.len()
    }
    fn set_pixel(&mut self, index: usize, color: Rgb) {
        self.pixels[index] = color;
    }
    fn fill(&mut self, color: Rgb) {
        for pixel in self.pixels.iter_mut() {
            *pixel = color;
        }
    }
    fn set_brightness(&mut self, value: f32) {
        self.brightness = value;
    }
    fn show(&mut self) -> Result<(), StripError> {
        let lit = self.pixels.iter().filter(|&&p| p != Rgb::BLACK).count();
        debug!(
            "{}: {} of {} pixels lit at {:.2}",
            self.name,
            lit,
            self.pixels.len(),
            self.brightness
        );
        Ok(())
    }
}

/// A servo that only remembers and logs what it was told.
#[derive(Debug, Default)]
pub struct ConsoleServo {
    last: Option<f32>,
}

impl ServoDriver for ConsoleServo {
    fn set_angle(&mut self, degrees: f32) {
        self.last = Some(degrees);
        debug!("servo: {:.1} deg", degrees);
    }
    fn angle(&self) -> Option<f32> {
        self.last
    }
}

/// A 16x2 display rendered into the log.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl StatusDisplay for ConsoleDisplay {
    fn set_color(&mut self, r: u8, g: u8, b: u8) {
        info!("lcd color ({}, {}, {})", r, g, b);
    }
    fn clear(&mut self) {}
    fn write_at(&mut self, _col: u8, row: u8, text: &str) {
        info!("lcd[{}]: {}", row, text);
    }
}

/// A slideshow surface that logs what it would show.
#[derive(Debug, Default)]
pub struct ConsoleScreen;

impl SlideshowScreen for ConsoleScreen {
    fn show_image(&mut self, path: &std::path::Path) -> Result<(), DisplayError> {
        info!("screen: {}", path.display());
        Ok(())
    }
    fn release(&mut self) {}
}

type PressHandler = Arc<Mutex<Option<Box<dyn Fn() + Send>>>>;

/// A button driven by stdin: every line is one press. The callback pump
/// starts on the first `on_press`; one line per intended press, typing
/// ahead presses early.
pub struct StdinButton {
    handler: PressHandler,
    pump_started: bool,
}

impl StdinButton {
    /// A button with no handler installed.
    pub fn new() -> Self {
        StdinButton {
            handler: Arc::new(Mutex::new(None)),
            pump_started: false,
        }
    }
}

impl Default for StdinButton {
    fn default() -> Self {
        StdinButton::new()
    }
}

impl ButtonInput for StdinButton {
    fn wait_for_press(&mut self) {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }

    fn on_press(&mut self, callback: Box<dyn Fn() + Send>) {
        *self.handler.lock().unwrap() = Some(callback);
        if self.pump_started {
            return;
        }
        self.pump_started = true;
        let handler = self.handler.clone();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if let Some(callback) = handler.lock().unwrap().as_ref() {
                            callback();
                        }
                    }
                }
            }
        });
    }

    fn clear_press_handler(&mut self) {
        *self.handler.lock().unwrap() = None;
    }
}

/// A sync step that only announces itself.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl SyncPublisher for LogPublisher {
    fn publish(&mut self) -> Result<(), SyncError> {
        info!("sync: publishing snapshot set");
        Ok(())
    }
}
