//! Loop correction: dataset transforms and the step/iteration controller.

pub mod controller;
pub mod transform;

pub use controller::*;
pub use transform::*;
