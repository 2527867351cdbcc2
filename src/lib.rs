//! Streaming non-Cartesian CG-SENSE reconstruction.
//!
//! A [engine::ConfiguredEngine] owns one slice. Profiles are pushed in one at a time and every
//! `profiles_per_frame` profiles (minus the `shared_profiles` re-used from the previous frame) a
//! frame is reconstructed by preconditioned conjugate gradient on the SENSE normal equations.

pub mod buffer;
pub mod cfl;
pub mod device;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod fft;
pub mod gridding;
pub mod message;
pub mod params;
pub mod precond;
pub mod regularization;
pub mod sim;
pub mod solver;
pub mod stage;
pub mod strategy;
pub mod trajectory;

pub use engine::{CgSenseNode, ConfigureError, ConfiguredEngine, ProcessOutcome, UnconfiguredEngine};
pub use error::{ReconError, Result};
pub use message::{AcquisitionHeader, AcquisitionProfile, ImageHeader, Message, ReconImage};
pub use params::{EncodingState, ReconParams, ScanParams};
pub use solver::{SolveReport, SolveStatus};
