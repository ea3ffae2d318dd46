//! Mathematical utilities: basis functions, least squares and interpolation.

pub mod basis;
pub mod interp;
pub mod ols;

pub use basis::*;
pub use interp::*;
pub use ols::*;
