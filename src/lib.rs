//! The DAB installation is a table with several cameras, two light strips,
//! a motorized mirror on a servo, a big button, and a small status display.
//! A visitor presses the button; the servo walks through a bounded random
//! sequence, each step re-seeding the lights and capturing a snapshot from
//! every camera; when the sequence ends the snapshot sets are published
//! and the installation says goodbye. A live preview of every camera
//! streams over HTTP the whole time.
//!
//! This crate is the orchestration layer: the per-camera frame caches, the
//! light animation engine, the servo step sequencer, the snapshot
//! correlator, and the phase controller that starts and stops all of them
//! with clean shutdown ordering. The actual device drivers (capture,
//! strip and servo signals, button, display) and the HTTP transport sit
//! behind the traits in [`capture`], [`lights`], [`servo`], [`button`],
//! and [`display`]; the [`demo`] module has hardware-free stand-ins for
//! bench runs.

#![warn(missing_docs)]
pub mod args;
pub mod button;
pub mod camera;
pub mod cancel;
pub mod capture;
pub mod demo;
pub mod display;
pub mod lights;
pub mod phase;
pub mod servo;
pub mod snapshot;
pub mod stream;
