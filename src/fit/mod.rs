//! Curve fitting orchestration.
//!
//! Responsibilities:
//!
//! - resolve regions of a branch into fit inputs
//! - fit polynomials and cubic B-splines
//! - select a polynomial degree using BIC + guardrails (candidates in parallel)

pub mod fitter;
pub mod region;
pub mod selection;

pub use fitter::*;
pub use selection::*;
