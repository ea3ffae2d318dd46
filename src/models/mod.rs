//! Fit model bases: polynomials and cubic B-splines.
//!
//! Models are implemented as small, pure functions so that fitting code can
//! stay generic over the basis.

pub mod model;

pub use model::*;
