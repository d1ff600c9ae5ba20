//! Randomized "seed" lighting for the installation's strips, and the
//! current-budget arithmetic that keeps the random draws electrically safe.
//! The engine owns the strips outright; everything else can only raise a
//! refresh signal, so no per-strip lock exists anywhere.

use crate::cancel::RunToken;
use log::{debug, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The engine re-seeds on its own this often even when nobody signals it.
const SELF_REFRESH: Duration = Duration::from_millis(100);

/// The shared supply budget the strips must stay under, worst case.
pub const SYSTEM_BUDGET_AMPS: f32 = 3.6;

/// One strip pixel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// All channels off.
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
}

/// Errors from the pixel-strip driver's `show`.
#[derive(Debug)]
pub struct StripError(pub String);

impl fmt::Display for StripError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "strip error: {}", self.0)
    }
}

impl std::error::Error for StripError {}

/// The low-level strip interface; the signal generation behind it lives
/// outside this crate. Brightness is a whole-strip scalar, as on the
/// hardware.
pub trait StripDriver: Send {
    /// Number of pixels on the strip.
    fn len(&self) -> usize;
    /// Whether the strip has zero pixels.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Stages one pixel. `index` must be below `len()`.
    fn set_pixel(&mut self, index: usize, color: Rgb);
    /// Stages every pixel to `color`.
    fn fill(&mut self, color: Rgb);
    /// Stages the whole-strip brightness scalar, 0.0..=1.0.
    fn set_brightness(&mut self, value: f32);
    /// Pushes the staged state out to the strip.
    fn show(&mut self) -> Result<(), StripError>;
}

/// Per-strip randomization bounds. The ceiling is the hard brightness cap
/// for this strip, derived from the shared current budget; every draw is
/// clamped to it before any write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripConfig {
    /// Fewest seeds painted per refresh.
    pub min_seeds: u32,
    /// Most seeds painted per refresh.
    pub max_seeds: u32,
    /// Dimmest allowed brightness draw.
    pub min_brightness: f32,
    /// Brightest allowed brightness, the strip's safety ceiling.
    pub ceiling: f32,
    /// Supply current of one pixel at full white, full brightness.
    pub per_pixel_amps: f32,
}

impl StripConfig {
    /// The long strip along the table edge: 1-3 seeds, capped at 0.35 so
    /// 120 pixels of 60 mA stay near 2.5 A worst case.
    pub fn long_strip() -> Self {
        StripConfig {
            min_seeds: 1,
            max_seeds: 3,
            min_brightness: 0.1,
            ceiling: 0.35,
            per_pixel_amps: 0.06,
        }
    }

    /// The ring around the lens: always 2 seeds, capped at 0.8 since 32
    /// pixels of 40 mA stay near 1 A.
    pub fn ring() -> Self {
        StripConfig {
            min_seeds: 2,
            max_seeds: 2,
            min_brightness: 0.1,
            ceiling: 0.8,
            per_pixel_amps: 0.04,
        }
    }
}

/// Worst-case draw of one strip: every pixel lit at the ceiling. The seed
/// runs can cover the whole strip when every draw comes up maximal, so
/// nothing less conservative is safe.
pub fn worst_case_current(len: usize, config: &StripConfig) -> f32 {
    len as f32 * config.per_pixel_amps * config.ceiling
}

/// A strip paired with its randomization bounds.
pub struct Strip {
    /// The strip hardware.
    pub driver: Box<dyn StripDriver>,
    /// Its randomization bounds.
    pub config: StripConfig,
}

/// Clears the strip, then paints K random seed runs: K drawn from the
/// configured range, each run's length drawn from `1..=len/K`, color drawn
/// in the yellow-to-white band, brightness drawn within the safety band.
/// Runs clip at the end of the strip, they never wrap.
fn paint_seeds(
    strip: &mut dyn StripDriver,
    config: &StripConfig,
    rng: &mut impl Rng,
) -> Result<(), StripError> {
    let len = strip.len();
    strip.fill(Rgb::BLACK);
    if len == 0 {
        return strip.show();
    }
    let min_seeds = config.min_seeds.max(1);
    let max_seeds = config.max_seeds.max(min_seeds);
    let seeds = rng.gen_range(min_seeds..=max_seeds);
    let max_run = (len / seeds as usize).max(1);
    for _ in 0..seeds {
        let seed = rng.gen_range(0..len);
        let run = rng.gen_range(1..=max_run);
        let brightness = rng.gen_range(config.min_brightness..=config.ceiling);
        strip.set_brightness(brightness.clamp(0.0, config.ceiling));
        // Yellow to white: red and green pinned, blue picks the tint.
        let color = Rgb {
            r: 255,
            g: 255,
            b: rng.gen(),
        };
        for offset in 0..run {
            let index = seed + offset;
            if index >= len {
                break;
            }
            strip.set_pixel(index, color);
        }
    }
    strip.show()
}

fn repaint(strips: &mut [Strip], rng: &mut impl Rng) {
    for strip in strips.iter_mut() {
        if let Err(e) = paint_seeds(strip.driver.as_mut(), &strip.config, rng) {
            warn!("strip refresh failed: {}", e);
        }
    }
}

/// Cheap cloneable handle other components use to wake the engine. The
/// signal is level-triggered with a timeout on the far side, so dropped or
/// duplicate raises are harmless; re-seeding early is idempotent.
#[derive(Debug, Clone)]
pub struct RefreshSignal(Sender<()>);

impl RefreshSignal {
    /// Wakes the engine for one extra re-seed. Never blocks.
    pub fn raise(&self) {
        let _ = self.0.send(());
    }
}

/// Rejection raised when a strip set cannot be driven safely.
#[derive(Debug)]
pub enum LightsError {
    /// The combined worst-case draw of the configured strips exceeds the
    /// supply budget.
    BudgetExceeded {
        /// Combined worst-case draw of the strips, in amps.
        worst_case: f32,
        /// The budget they had to fit in, in amps.
        budget: f32,
    },
}

impl fmt::Display for LightsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LightsError::BudgetExceeded { worst_case, budget } => write!(
                f,
                "worst-case strip current {:.2} A exceeds the {:.2} A budget",
                worst_case, budget
            ),
        }
    }
}

impl std::error::Error for LightsError {}

/// Background loop painting randomized patterns on every strip, woken by
/// [`RefreshSignal`] or by its own timeout. Exclusive owner of all pixel
/// state.
pub struct LightAnimationEngine {
    strips: Option<Vec<Strip>>,
    refresh_tx: Sender<()>,
    parked_rx: Option<Receiver<()>>,
    token: RunToken,
    handle: Option<JoinHandle<(Vec<Strip>, Receiver<()>)>>,
}

impl LightAnimationEngine {
    /// Takes ownership of the strips after checking them against the
    /// supply budget. A set whose worst case overdraws the supply is
    /// rejected here, before anything is ever lit.
    pub fn new(strips: Vec<Strip>, budget_amps: f32) -> Result<Self, LightsError> {
        let worst_case: f32 = strips
            .iter()
            .map(|strip| worst_case_current(strip.driver.len(), &strip.config))
            .sum();
        if worst_case > budget_amps {
            return Err(LightsError::BudgetExceeded {
                worst_case,
                budget: budget_amps,
            });
        }
        let (refresh_tx, parked_rx) = mpsc::channel();
        Ok(LightAnimationEngine {
            strips: Some(strips),
            refresh_tx,
            parked_rx: Some(parked_rx),
            token: RunToken::new(),
            handle: None,
        })
    }

    /// A wakeup handle for other components. Stays valid across engine
    /// restarts.
    pub fn refresh_signal(&self) -> RefreshSignal {
        RefreshSignal(self.refresh_tx.clone())
    }

    /// Wakes the animation loop for one extra re-seed.
    pub fn request_refresh(&self) {
        let _ = self.refresh_tx.send(());
    }

    /// Paints an initial pattern and starts the loop. A no-op while the
    /// loop is already running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let (mut strips, rx) = match (self.strips.take(), self.parked_rx.take()) {
            (Some(strips), Some(rx)) => (strips, rx),
            (strips, rx) => {
                self.strips = strips;
                self.parked_rx = rx;
                return;
            }
        };
        self.token = RunToken::new();
        let token = self.token.clone();
        self.handle = Some(thread::spawn(move || {
            let mut rng = thread_rng();
            repaint(&mut strips, &mut rng);
            while token.should_continue() {
                match rx.recv_timeout(SELF_REFRESH) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if !token.should_continue() {
                    break;
                }
                repaint(&mut strips, &mut rng);
                // Signals raised while painting would just repeat the
                // repaint; coalesce them.
                while rx.try_recv().is_ok() {}
            }
            (strips, rx)
        }));
    }

    /// Signals termination, joins the loop, reclaims the strips, and
    /// blanks them. Idempotent, and safe before `start()`.
    pub fn stop(&mut self) {
        self.token.stop();
        let _ = self.refresh_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Ok((strips, rx)) = handle.join() {
                self.strips = Some(strips);
                self.parked_rx = Some(rx);
            }
        }
        self.blackout();
    }

    /// Forces every strip dark. Best-effort: a strip that fails to show is
    /// logged and skipped, shutdown must not stall on a dead strip.
    pub fn blackout(&mut self) {
        if let Some(strips) = &mut self.strips {
            for strip in strips.iter_mut() {
                strip.driver.fill(Rgb::BLACK);
                if let Err(e) = strip.driver.show() {
                    debug!("blackout: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct StripState {
        pixels: Vec<Rgb>,
        brightness_writes: Vec<f32>,
        shows: u32,
    }

    /// A recording strip whose state stays observable after the engine
    /// consumes the driver.
    #[derive(Clone)]
    struct RecordingStrip {
        len: usize,
        state: Arc<Mutex<StripState>>,
    }

    impl RecordingStrip {
        fn new(len: usize) -> Self {
            RecordingStrip {
                len,
                state: Arc::new(Mutex::new(StripState {
                    pixels: vec![Rgb::BLACK; len],
                    ..StripState::default()
                })),
            }
        }
    }

    impl StripDriver for RecordingStrip {
        fn len(&self) -> usize {
            self.len
        }
        fn set_pixel(&mut self, index: usize, color: Rgb) {
            assert!(index < self.len, "pixel write past the end of the strip");
            self.state.lock().unwrap().pixels[index] = color;
        }
        fn fill(&mut self, color: Rgb) {
            let mut state = self.state.lock().unwrap();
            for pixel in state.pixels.iter_mut() {
                *pixel = color;
            }
        }
        fn set_brightness(&mut self, value: f32) {
            self.state.lock().unwrap().brightness_writes.push(value);
        }
        fn show(&mut self) -> Result<(), StripError> {
            self.state.lock().unwrap().shows += 1;
            Ok(())
        }
    }

    #[test]
    fn brightness_draws_stay_inside_the_band() {
        let config = StripConfig::long_strip();
        let mut strip = RecordingStrip::new(120);
        let state = strip.state.clone();
        let mut rng = thread_rng();
        for _ in 0..200 {
            paint_seeds(&mut strip, &config, &mut rng).unwrap();
        }
        let writes = &state.lock().unwrap().brightness_writes;
        assert!(!writes.is_empty());
        for &b in writes {
            assert!(b >= config.min_brightness && b <= config.ceiling);
        }
    }

    #[test]
    fn seed_runs_never_wrap_or_overrun() {
        // RecordingStrip panics on any out-of-range write; a tiny strip
        // with a wide seed range exercises the clipping path hard.
        let config = StripConfig {
            min_seeds: 1,
            max_seeds: 4,
            min_brightness: 0.1,
            ceiling: 1.0,
            per_pixel_amps: 0.0,
        };
        let mut strip = RecordingStrip::new(5);
        let mut rng = thread_rng();
        for _ in 0..500 {
            paint_seeds(&mut strip, &config, &mut rng).unwrap();
        }
    }

    #[test]
    fn stock_strip_set_fits_the_budget() {
        // 120 * 0.06 * 0.35 + 32 * 0.04 * 0.8 = 2.52 + 1.024
        let long = worst_case_current(120, &StripConfig::long_strip());
        let ring = worst_case_current(32, &StripConfig::ring());
        assert!(long + ring <= SYSTEM_BUDGET_AMPS);
    }

    #[test]
    fn over_budget_strip_set_is_rejected() {
        let strips = vec![
            Strip {
                driver: Box::new(RecordingStrip::new(120)),
                config: StripConfig::long_strip(),
            },
            Strip {
                driver: Box::new(RecordingStrip::new(32)),
                config: StripConfig::ring(),
            },
        ];
        match LightAnimationEngine::new(strips, 3.0) {
            Err(LightsError::BudgetExceeded { worst_case, budget }) => {
                assert!(worst_case > budget);
            }
            Ok(_) => panic!("3.0 A cannot cover the stock strip set"),
        }
    }

    #[test]
    fn engine_paints_refreshes_and_blanks_on_stop() {
        let strip = RecordingStrip::new(32);
        let state = strip.state.clone();
        let strips = vec![Strip {
            driver: Box::new(strip),
            config: StripConfig::ring(),
        }];
        let mut engine = LightAnimationEngine::new(strips, SYSTEM_BUDGET_AMPS).unwrap();
        engine.start();
        engine.start(); // duplicate start is a no-op
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while state.lock().unwrap().shows == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        engine.request_refresh();
        engine.stop();
        engine.stop();
        let state = state.lock().unwrap();
        assert!(state.shows >= 2);
        assert!(state.pixels.iter().all(|&p| p == Rgb::BLACK));
    }

    #[test]
    fn stop_before_start_is_safe_and_blanks() {
        let strip = RecordingStrip::new(8);
        let state = strip.state.clone();
        let strips = vec![Strip {
            driver: Box::new(strip),
            config: StripConfig::ring(),
        }];
        let mut engine = LightAnimationEngine::new(strips, SYSTEM_BUDGET_AMPS).unwrap();
        engine.stop();
        assert_eq!(state.lock().unwrap().shows, 1);
    }
}
