//! The top-level phase machine: Idle until the button, Running while the
//! servo sequence plays out, Finished when it ends. This is the only place
//! that starts or stops the children, and every exit path funnels through
//! the same shutdown ordering so the installation never ends with lit
//! strips or open cameras.

use crate::button::ButtonInput;
use crate::camera::CameraWorker;
use crate::cancel::POLL_INTERVAL;
use crate::display::{
    show_error, show_finished, show_hello, show_running, DisplayError, SlideshowScreen,
    StatusDisplay,
};
use crate::lights::LightAnimationEngine;
use crate::servo::ServoSequencer;
use log::{debug, error, info, warn};
use rand::prelude::*;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Image shown while waiting for the button.
const START_IMAGE: &str = "Start.jpeg";
/// Image shown once the sequence has ended.
const FINISHED_IMAGE: &str = "Finished.jpeg";

const SLIDE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Top-level lifecycle state of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the trigger.
    Idle,
    /// Sequence in progress.
    Running,
    /// Sequence over; terminal in the single-shot flow.
    Finished,
}

/// Whether one button press means one run, or the installation re-arms
/// after every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One run, then exit.
    SingleShot,
    /// Back to Idle after every run.
    Repeating,
}

/// Pacing knobs for the visitor-facing flow.
#[derive(Debug, Clone)]
pub struct PhaseTiming {
    /// How long each slideshow image stays up.
    pub slide_duration: Duration,
    /// Dwell on the goodbye screen, long enough for a pending sync to
    /// drain.
    pub finish_dwell: Duration,
    /// Dwell on the error screen before exiting.
    pub error_dwell: Duration,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        PhaseTiming {
            slide_duration: Duration::from_secs(3),
            finish_dwell: Duration::from_secs(5),
            error_dwell: Duration::from_secs(10),
        }
    }
}

/// Errors caught at the orchestration boundary. Nothing below this layer
/// raises across a thread; these are the few failures of the main flow
/// itself.
#[derive(Debug)]
pub enum PhaseError {
    /// The slideshow folder exists but could not be listed.
    Io(std::io::Error),
    /// The slideshow surface failed outright.
    Display(DisplayError),
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PhaseError::Io(e) => write!(f, "io error: {}", e),
            PhaseError::Display(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PhaseError {}

/// Owns every child of the installation and drives them through the
/// phases. Collaborators get explicit handles (a [`crate::stream::StreamView`],
/// a [`crate::servo::StopRequest`]) rather than reaching into shared
/// globals.
pub struct PhaseController {
    display: Box<dyn StatusDisplay>,
    screen: Box<dyn SlideshowScreen>,
    button: Box<dyn ButtonInput>,
    lights: LightAnimationEngine,
    sequencer: Option<ServoSequencer>,
    cameras: Vec<CameraWorker>,
    image_folder: PathBuf,
    mode: RunMode,
    timing: PhaseTiming,
    phase: Phase,
}

impl PhaseController {
    /// Wires up the controller. `sequencer` is `None` when the servo never
    /// initialized; the phase machine still completes without it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        display: Box<dyn StatusDisplay>,
        screen: Box<dyn SlideshowScreen>,
        button: Box<dyn ButtonInput>,
        lights: LightAnimationEngine,
        sequencer: Option<ServoSequencer>,
        cameras: Vec<CameraWorker>,
        image_folder: PathBuf,
        mode: RunMode,
        timing: PhaseTiming,
    ) -> Self {
        PhaseController {
            display,
            screen,
            button,
            lights,
            sequencer,
            cameras,
            image_folder,
            mode,
            timing,
            phase: Phase::Idle,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs the installation to completion. This is the error boundary:
    /// a failing main flow is shown on the status display and absorbed,
    /// and the children are stopped in order no matter how the flow ended.
    pub fn run(&mut self) {
        if let Err(e) = self.run_phases() {
            error!("orchestration failed: {}", e);
            show_error(self.display.as_mut());
            thread::sleep(self.timing.error_dwell);
        }
        self.shutdown();
    }

    fn run_phases(&mut self) -> Result<(), PhaseError> {
        let slides = self.load_slides()?;
        info!("{} slideshow images", slides.len());
        loop {
            self.idle_phase();
            self.running_phase(&slides);
            self.finished_phase();
            if self.mode == RunMode::SingleShot {
                return Ok(());
            }
            info!("re-arming for the next visitor");
        }
    }

    fn idle_phase(&mut self) {
        self.phase = Phase::Idle;
        info!("phase: idle, waiting for the button");
        show_hello(self.display.as_mut());
        let start_image = self.image_folder.join(START_IMAGE);
        if start_image.exists() {
            if let Err(e) = self.screen.show_image(&start_image) {
                debug!("start image: {}", e);
            }
        }
        self.button.wait_for_press();
        info!("button pressed");
    }

    fn running_phase(&mut self, slides: &[PathBuf]) {
        self.phase = Phase::Running;
        info!("phase: running");
        show_running(self.display.as_mut());
        self.lights.start();
        let Some(sequencer) = &mut self.sequencer else {
            warn!("no servo available, skipping the sequence");
            return;
        };
        sequencer.start();
        let stop = sequencer.stop_request();
        let button_stop = stop.clone();
        self.button
            .on_press(Box::new(move || button_stop.request()));

        let mut slide_no = 0usize;
        let mut last_slide: Option<Instant> = None;
        loop {
            if sequencer.is_done() || stop.is_requested() {
                break;
            }
            let due = last_slide.map_or(true, |at| at.elapsed() >= self.timing.slide_duration);
            if !slides.is_empty() && due {
                let slide = &slides[slide_no % slides.len()];
                if let Err(e) = self.screen.show_image(slide) {
                    debug!("slide: {}", e);
                }
                slide_no += 1;
                last_slide = Some(Instant::now());
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.button.clear_press_handler();
    }

    fn finished_phase(&mut self) {
        self.phase = Phase::Finished;
        info!("phase: finished");
        show_finished(self.display.as_mut());
        self.lights.stop();
        let finished_image = self.image_folder.join(FINISHED_IMAGE);
        if finished_image.exists() {
            if let Err(e) = self.screen.show_image(&finished_image) {
                debug!("finished image: {}", e);
            }
        }
        // The sequencer thread may still be draining its last capture or
        // the sync publish; the dwell covers that before the join below.
        thread::sleep(self.timing.finish_dwell);
        if let Some(sequencer) = &mut self.sequencer {
            sequencer.stop();
        }
    }

    /// Stops every child in order. Runs on every exit path, including the
    /// error boundary, and tolerates children that already stopped or
    /// never started.
    fn shutdown(&mut self) {
        info!("shutting down");
        if let Some(sequencer) = &mut self.sequencer {
            sequencer.stop();
        }
        self.lights.stop();
        // Strips must be dark on exit even if the engine never ran.
        self.lights.blackout();
        for camera in &mut self.cameras {
            camera.stop();
        }
        self.screen.release();
    }

    fn load_slides(&self) -> Result<Vec<PathBuf>, PhaseError> {
        if !self.image_folder.exists() {
            return Ok(Vec::new());
        }
        let mut slides: Vec<PathBuf> = fs::read_dir(&self.image_folder)
            .map_err(PhaseError::Io)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| SLIDE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        slides.shuffle(&mut thread_rng());
        Ok(slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Frame, FrameCache};
    use crate::display::{DisplayError, SlideshowScreen, StatusDisplay};
    use crate::lights::{Rgb, Strip, StripConfig, StripDriver, StripError, SYSTEM_BUDGET_AMPS};
    use crate::servo::{SequencerConfig, ServoDriver};
    use crate::snapshot::{
        default_policies, ImageStorage, SnapshotCorrelator, StorageError, SyncError, SyncPublisher,
    };
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct TestDisplay {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl StatusDisplay for TestDisplay {
        fn set_color(&mut self, _r: u8, _g: u8, _b: u8) {}
        fn clear(&mut self) {}
        fn write_at(&mut self, _col: u8, _row: u8, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct TestScreen {
        shown: Arc<Mutex<Vec<PathBuf>>>,
        released: Arc<Mutex<bool>>,
    }

    impl SlideshowScreen for TestScreen {
        fn show_image(&mut self, path: &Path) -> Result<(), DisplayError> {
            self.shown.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
        fn release(&mut self) {
            *self.released.lock().unwrap() = true;
        }
    }

    /// A button that "presses itself" a fixed number of times, then never
    /// again.
    struct AutoButton {
        presses_left: u32,
    }

    impl ButtonInput for AutoButton {
        fn wait_for_press(&mut self) {
            assert!(self.presses_left > 0, "flow waited for a press that never comes");
            self.presses_left -= 1;
        }
        fn on_press(&mut self, _callback: Box<dyn Fn() + Send>) {}
        fn clear_press_handler(&mut self) {}
    }

    #[derive(Clone)]
    struct SharedStrip {
        len: usize,
        pixels: Arc<Mutex<Vec<Rgb>>>,
    }

    impl SharedStrip {
        fn new(len: usize) -> Self {
            SharedStrip {
                len,
                pixels: Arc::new(Mutex::new(vec![Rgb::BLACK; len])),
            }
        }
    }

    impl StripDriver for SharedStrip {
        fn len(&self) -> usize {
            self.len
        }
        fn set_pixel(&mut self, index: usize, color: Rgb) {
            self.pixels.lock().unwrap()[index] = color;
        }
        fn fill(&mut self, color: Rgb) {
            for pixel in self.pixels.lock().unwrap().iter_mut() {
                *pixel = color;
            }
        }
        fn set_brightness(&mut self, _value: f32) {}
        fn show(&mut self) -> Result<(), StripError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedServo {
        commands: Arc<Mutex<Vec<f32>>>,
    }

    impl ServoDriver for SharedServo {
        fn set_angle(&mut self, degrees: f32) {
            self.commands.lock().unwrap().push(degrees);
        }
        fn angle(&self) -> Option<f32> {
            self.commands.lock().unwrap().last().copied()
        }
    }

    struct RecordingStorage {
        saved: Arc<Mutex<Vec<String>>>,
    }

    impl ImageStorage for RecordingStorage {
        fn save_image(&mut self, name: &str, _frame: &Frame) -> Result<(), StorageError> {
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

    fn fast_timing() -> PhaseTiming {
        PhaseTiming {
            slide_duration: Duration::from_millis(5),
            finish_dwell: Duration::from_millis(5),
            error_dwell: Duration::from_millis(5),
        }
    }

    fn fast_sequencer_config(steps: u32) -> SequencerConfig {
        SequencerConfig {
            steps,
            min_step_deg: 3.0,
            max_step_deg: 30.0,
            speed_deg_per_sec: 3600.0,
            update_hz: 1000,
            settle_pause: Duration::from_millis(2),
            post_capture_pause: Duration::from_millis(2),
        }
    }

    #[test]
    fn single_shot_flow_reaches_finished_and_syncs_once() {
        let strip = SharedStrip::new(16);
        let strip_pixels = strip.pixels.clone();
        let lights = LightAnimationEngine::new(
            vec![Strip {
                driver: Box::new(strip),
                config: StripConfig::ring(),
            }],
            SYSTEM_BUDGET_AMPS,
        )
        .unwrap();

        let cache = FrameCache::new();
        cache.store(Frame::new(4, 4, vec![1; 4 * 4 * 3]));
        let saved = Arc::new(Mutex::new(Vec::new()));
        let publishes = Arc::new(Mutex::new(0));
        let correlator = SnapshotCorrelator::new(
            vec![("CSI90".to_string(), cache)],
            default_policies(),
            Box::new(RecordingStorage {
                saved: saved.clone(),
            }),
            Box::new(CountingPublisher {
                calls: publishes.clone(),
            }),
        );
        let sequencer = ServoSequencer::new(
            Box::new(SharedServo::default()),
            correlator,
            fast_sequencer_config(3),
            lights.refresh_signal(),
        );

        let display = TestDisplay::default();
        let display_lines = display.lines.clone();
        let screen = TestScreen::default();
        let released = screen.released.clone();

        let mut controller = PhaseController::new(
            Box::new(display),
            Box::new(screen),
            Box::new(AutoButton { presses_left: 1 }),
            lights,
            Some(sequencer),
            Vec::new(),
            PathBuf::from("no-such-folder"),
            RunMode::SingleShot,
            fast_timing(),
        );
        controller.run();

        assert_eq!(controller.phase(), Phase::Finished);
        assert_eq!(saved.lock().unwrap().len(), 3);
        assert_eq!(*publishes.lock().unwrap(), 1);
        assert!(*released.lock().unwrap());
        assert!(strip_pixels.lock().unwrap().iter().all(|&p| p == Rgb::BLACK));
        let lines = display_lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("Hello")));
        assert!(lines.iter().any(|l| l.contains("Running")));
        assert!(lines.iter().any(|l| l.contains("Thank you")));
    }

    #[test]
    fn missing_servo_still_finishes_the_flow() {
        let lights = LightAnimationEngine::new(Vec::new(), SYSTEM_BUDGET_AMPS).unwrap();
        let mut controller = PhaseController::new(
            Box::new(TestDisplay::default()),
            Box::new(TestScreen::default()),
            Box::new(AutoButton { presses_left: 1 }),
            lights,
            None,
            Vec::new(),
            PathBuf::from("no-such-folder"),
            RunMode::SingleShot,
            fast_timing(),
        );
        controller.run();
        assert_eq!(controller.phase(), Phase::Finished);
    }

    #[test]
    fn slideshow_lists_only_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let lights = LightAnimationEngine::new(Vec::new(), SYSTEM_BUDGET_AMPS).unwrap();
        let controller = PhaseController::new(
            Box::new(TestDisplay::default()),
            Box::new(TestScreen::default()),
            Box::new(AutoButton { presses_left: 0 }),
            lights,
            None,
            Vec::new(),
            dir.path().to_path_buf(),
            RunMode::SingleShot,
            fast_timing(),
        );
        let slides = controller.load_slides().unwrap();
        assert_eq!(slides.len(), 2);
    }
}
