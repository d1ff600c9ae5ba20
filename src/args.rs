// Commandline argument parser using clap for the installation controller

use clap::Parser;
use std::path::PathBuf;

/// Controller for the DAB interactive camera installation.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct StationArgs {
    /// Number of servo steps per run
    #[arg(short = 'n', long = "steps", default_value_t = 10)]
    pub steps: u32,

    /// Folder holding the slideshow images
    #[arg(long = "images", default_value = "images")]
    pub image_folder: PathBuf,

    /// Folder the snapshot sets are written into
    #[arg(long = "snapshots", default_value = "Color")]
    pub snapshot_folder: PathBuf,

    /// RON file overriding the built-in per-camera crop policies
    #[arg(long = "crops")]
    pub crop_file: Option<PathBuf>,

    /// Re-arm after every run instead of exiting after one
    #[arg(long)]
    pub repeat: bool,

    /// Number of USB camera indices to probe at startup
    #[arg(long = "usb", default_value_t = 4)]
    pub usb_slots: u32,

    /// Number of CSI camera ports to probe at startup
    #[arg(long = "csi", default_value_t = 2)]
    pub csi_slots: u32,
}
