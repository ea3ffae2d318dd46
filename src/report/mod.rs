//! Reporting utilities: formatted terminal output for fits, chains and metrics.

pub mod format;

pub use format::*;
