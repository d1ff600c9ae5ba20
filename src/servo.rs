//! The step sequencer behind the installation's motion: a bounded number
//! of randomized bounded moves, each one synchronized with a light refresh
//! and a snapshot, with graceful mid-sequence cancellation. Motion cannot
//! be preempted mid-pulse, so cancellation is cooperative: an in-flight
//! interpolation tick always completes before a stop is honored.

use crate::cancel::{RunToken, POLL_INTERVAL};
use crate::lights::RefreshSignal;
use crate::snapshot::SnapshotCorrelator;
use log::info;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The low-level servo interface; pulse generation lives outside this
/// crate.
pub trait ServoDriver: Send {
    /// Commands the horn to `degrees`, 0..=180.
    fn set_angle(&mut self, degrees: f32);
    /// The last commanded angle, or `None` if nothing was ever commanded.
    fn angle(&self) -> Option<f32>;
}

/// Bounds for one run of the sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Number of steps in a full sequence.
    pub steps: u32,
    /// Smallest random step, in degrees.
    pub min_step_deg: f32,
    /// Largest random step, in degrees.
    pub max_step_deg: f32,
    /// Angular speed during interpolation.
    pub speed_deg_per_sec: f32,
    /// Interpolation update rate.
    pub update_hz: u32,
    /// Settle time between the end of a move and its snapshot.
    pub settle_pause: Duration,
    /// Pause after the snapshot, before the next step.
    pub post_capture_pause: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            steps: 10,
            min_step_deg: 3.0,
            max_step_deg: 30.0,
            speed_deg_per_sec: 36.0,
            update_hz: 50,
            settle_pause: Duration::from_millis(1500),
            post_capture_pause: Duration::from_millis(500),
        }
    }
}

/// Where the sequencer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqState {
    /// No run yet.
    Idle,
    /// Working through the steps.
    Stepping,
    /// A stop was observed; winding down without further motion.
    Stopping,
    /// The run ended, completed or cancelled.
    Done,
}

/// Cloneable graceful-stop handle. Honored only at the sequencer's
/// checkpoints, including between interpolation ticks; never preemptive.
#[derive(Debug, Clone, Default)]
pub struct StopRequest(Arc<AtomicBool>);

impl StopRequest {
    fn new() -> Self {
        StopRequest::default()
    }

    /// Asks the current run to end at its next checkpoint.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Boundary policy for the random walk: when the unclamped step would
/// leave 0..=180, reverse direction and reapply the same magnitude from
/// the current angle, then clamp. Returns the next target and the
/// (possibly flipped) direction.
pub fn bounce_step(current: f32, magnitude: f32, direction: f32) -> (f32, f32) {
    let mut direction = direction;
    let mut next = current + magnitude * direction;
    if !(0.0..=180.0).contains(&next) {
        direction = -direction;
        next = current + magnitude * direction;
    }
    (next.clamp(0.0, 180.0), direction)
}

/// Executes one bounded sequence of randomized moves on its own thread,
/// raising a light refresh and a snapshot per step. At most one run is
/// ever active.
pub struct ServoSequencer {
    config: SequencerConfig,
    refresh: RefreshSignal,
    inner: Option<(Box<dyn ServoDriver>, SnapshotCorrelator)>,
    state: Arc<Mutex<SeqState>>,
    stop_request: StopRequest,
    token: RunToken,
    handle: Option<JoinHandle<(Box<dyn ServoDriver>, SnapshotCorrelator)>>,
}

impl ServoSequencer {
    /// A sequencer owning `driver` and `correlator`, idle until `start()`.
    pub fn new(
        driver: Box<dyn ServoDriver>,
        correlator: SnapshotCorrelator,
        config: SequencerConfig,
        refresh: RefreshSignal,
    ) -> Self {
        ServoSequencer {
            config,
            refresh,
            inner: Some((driver, correlator)),
            state: Arc::new(Mutex::new(SeqState::Idle)),
            stop_request: StopRequest::new(),
            token: RunToken::new(),
            handle: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SeqState {
        *self.state.lock().unwrap()
    }

    /// Whether the run has ended (completed or cancelled).
    pub fn is_done(&self) -> bool {
        self.state() == SeqState::Done
    }

    /// The graceful-stop handle for the current run. Fetch it after
    /// `start()`; each run gets a fresh one.
    pub fn stop_request(&self) -> StopRequest {
        self.stop_request.clone()
    }

    /// Starts one run. A no-op while a run is active.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let Some((driver, correlator)) = self.inner.take() else {
            return;
        };
        self.stop_request = StopRequest::new();
        self.token = RunToken::new();
        *self.state.lock().unwrap() = SeqState::Stepping;
        let config = self.config.clone();
        let refresh = self.refresh.clone();
        let state = self.state.clone();
        let stop = self.stop_request.clone();
        let token = self.token.clone();
        self.handle = Some(thread::spawn(move || {
            run_sequence(driver, correlator, config, refresh, state, stop, token)
        }));
    }

    /// Forceful stop for process shutdown: drops the run flag, joins, and
    /// reclaims the hardware. Idempotent; also how a naturally finished
    /// run gets reaped before the next one.
    pub fn stop(&mut self) {
        self.token.stop();
        if let Some(handle) = self.handle.take() {
            if let Ok(inner) = handle.join() {
                self.inner = Some(inner);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_sequence(
    mut driver: Box<dyn ServoDriver>,
    mut correlator: SnapshotCorrelator,
    config: SequencerConfig,
    refresh: RefreshSignal,
    state: Arc<Mutex<SeqState>>,
    stop: StopRequest,
    token: RunToken,
) -> (Box<dyn ServoDriver>, SnapshotCorrelator) {
    let mut rng = thread_rng();
    // Park at 0 before the first step.
    let (_, mut current) = move_to(driver.as_mut(), 0.0, &config, &stop, &token);
    let mut direction = 1.0_f32;
    let mut completed = 0u32;
    for step_no in 1..=config.steps {
        if stop.is_requested() || !token.should_continue() {
            break;
        }
        refresh.raise();
        let magnitude = rng.gen_range(config.min_step_deg..=config.max_step_deg);
        let (target, flipped) = bounce_step(current, magnitude, direction);
        direction = flipped;
        info!(
            "servo step {}/{}: {:.1} -> {:.1}",
            step_no, config.steps, current, target
        );
        let (finished, reached) = move_to(driver.as_mut(), target, &config, &stop, &token);
        current = reached;
        if !finished {
            break;
        }
        if !pause(config.settle_pause, &stop, &token) {
            break;
        }
        correlator.capture(step_no);
        if !pause(config.post_capture_pause, &stop, &token) {
            break;
        }
        completed = step_no;
    }
    let full_run = completed == config.steps && !stop.is_requested() && token.should_continue();
    if full_run {
        info!("sequence complete, returning to 0");
        move_to(driver.as_mut(), 0.0, &config, &stop, &token);
        correlator.publish();
    } else {
        *state.lock().unwrap() = SeqState::Stopping;
        info!("sequence stopped early after step {}", completed);
    }
    *state.lock().unwrap() = SeqState::Done;
    (driver, correlator)
}

/// Interpolates from the last commanded angle to `target` at the
/// configured update rate. The stop flags are checked between ticks; an
/// in-flight tick always completes. Returns whether the move ran to
/// completion, and the last angle actually commanded.
fn move_to(
    driver: &mut dyn ServoDriver,
    target: f32,
    config: &SequencerConfig,
    stop: &StopRequest,
    token: &RunToken,
) -> (bool, f32) {
    let start = driver.angle().unwrap_or(0.0);
    let distance = (target - start).abs();
    let tick = Duration::from_secs_f32(1.0 / config.update_hz as f32);
    let ticks = (((distance / config.speed_deg_per_sec) * config.update_hz as f32).ceil() as u32)
        .max(1);
    let delta = (target - start) / ticks as f32;
    let mut angle = start;
    for _ in 0..ticks {
        if stop.is_requested() || !token.should_continue() {
            return (false, angle);
        }
        angle = (angle + delta).clamp(0.0, 180.0);
        driver.set_angle(angle);
        spin_sleep::sleep(tick);
    }
    driver.set_angle(target);
    (true, target)
}

/// A pause that honors both stop flags at [`POLL_INTERVAL`] granularity.
/// Returns `false` when cut short.
fn pause(total: Duration, stop: &StopRequest, token: &RunToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if stop.is_requested() || !token.should_continue() {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        thread::sleep(left.min(POLL_INTERVAL));
    }
}
