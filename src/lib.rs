//! Epoch based acquisition of motion (gait) and microphone (voice) samples, with per-epoch
//! spectral features.
//!
//! A session gates a pushed sample stream into a fixed number of fixed-duration epochs. Every
//! completed epoch is analysed off the sampling path and handed to a [sink::ResultSink] and to
//! the live [acquisition::Session] state.

#[macro_use]
extern crate log;

#[macro_use]
extern crate eyre;

pub mod acquisition;
pub mod config;
pub mod decimate;
pub mod features;
pub mod sample;
pub mod session;
pub mod sink;
pub mod source;
pub mod spectrum;
pub mod summary;
pub mod wire;

pub use acquisition::{Acquisition, EpochResult, Outcome, Report, Session, State};
pub use config::{Config, StreamConfig};
pub use sample::{Accel, Sample, StreamKind};
pub use session::SessionContext;
pub use spectrum::{Analyzer, Spectrum};
