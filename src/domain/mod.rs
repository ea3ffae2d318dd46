//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the loop data model (`LoopDataset`, `BranchData`, `Slot`)
//! - fit outputs (`FitResult`, `PolynomialParams`, `FitQuality`)
//! - the append-only version chain of corrected datasets (`VersionChain`)

pub mod chain;
pub mod types;

pub use chain::*;
pub use types::*;
