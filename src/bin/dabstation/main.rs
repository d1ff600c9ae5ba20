//! Bench entry point for the installation controller. It wires the
//! orchestration layer to the hardware-free devices from
//! [`dabstation::demo`]; a deployment build swaps those constructors for
//! the real drivers and changes nothing else. Exits 0 on every graceful
//! path; failures are absorbed into best-effort shutdown.

use clap::Parser;
use dabstation::{
    args::StationArgs,
    camera::probe_cameras,
    capture::default_slots,
    demo::{
        ConsoleDisplay, ConsoleScreen, ConsoleServo, ConsoleStrip, LogPublisher, StdinButton,
        SyntheticBackend,
    },
    lights::{LightAnimationEngine, Strip, StripConfig, SYSTEM_BUDGET_AMPS},
    phase::{PhaseController, PhaseTiming, RunMode},
    servo::{SequencerConfig, ServoSequencer},
    snapshot::{default_policies, load_policies, FsImageStorage, SnapshotCorrelator},
    stream::StreamView,
};
use log::{error, info, warn};

// Example:
// RUST_LOG=info cargo run -- --steps 10 --images images --snapshots Color

fn main() {
    env_logger::init();
    let args = StationArgs::parse();

    let backend = SyntheticBackend::default();
    let slots = default_slots(args.usb_slots, args.csi_slots);
    let cameras = probe_cameras(&backend, &slots);

    // The HTTP transport polls this view at its own cadence; here we just
    // announce what it would serve.
    let view = StreamView::new(&cameras);
    for key in view.keys() {
        info!("stream available: /video_feed/{}", key);
    }

    let strips = vec![
        Strip {
            driver: Box::new(ConsoleStrip::new("strip", 120)),
            config: StripConfig::long_strip(),
        },
        Strip {
            driver: Box::new(ConsoleStrip::new("ring", 32)),
            config: StripConfig::ring(),
        },
    ];
    let lights = match LightAnimationEngine::new(strips, SYSTEM_BUDGET_AMPS) {
        Ok(lights) => lights,
        Err(e) => {
            error!("strip configuration rejected: {}", e);
            return;
        }
    };

    let policies = match &args.crop_file {
        Some(path) => match load_policies(path) {
            Ok(policies) => policies,
            Err(e) => {
                warn!("crop file ignored: {}", e);
                default_policies()
            }
        },
        None => default_policies(),
    };
    let correlator = SnapshotCorrelator::new(
        cameras
            .iter()
            .map(|camera| (camera.tag().to_string(), camera.cache()))
            .collect(),
        policies,
        Box::new(FsImageStorage::new(&args.snapshot_folder)),
        Box::new(LogPublisher),
    );

    let config = SequencerConfig {
        steps: args.steps,
        ..SequencerConfig::default()
    };
    let sequencer = ServoSequencer::new(
        Box::new(ConsoleServo::default()),
        correlator,
        config,
        lights.refresh_signal(),
    );

    let mode = if args.repeat {
        RunMode::Repeating
    } else {
        RunMode::SingleShot
    };
    let mut controller = PhaseController::new(
        Box::new(ConsoleDisplay),
        Box::new(ConsoleScreen),
        Box::new(StdinButton::new()),
        lights,
        Some(sequencer),
        cameras,
        args.image_folder.clone(),
        mode,
        PhaseTiming::default(),
    );
    controller.run();
    info!("exited");
}
