//! `hyloop` library crate.
//!
//! Hysteresis loop correction: saturation-tail fitting, drift subtraction,
//! field shift/scale, iterative re-correction, routing of corrected series and
//! derived loop metrics (coercive field, remanence, anisotropy field).
//!
//! The binary (`hyloop`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the correction engine can be embedded by other front-ends

pub mod app;
pub mod cli;
pub mod correct;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod metrics;
pub mod models;
pub mod plot;
pub mod report;
pub mod route;
