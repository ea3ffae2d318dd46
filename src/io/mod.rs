//! Input/output helpers.
//!
//! - in-memory column tables (`table`)
//! - CSV ingest + loop column selection (`ingest`)
//! - CSV/JSON exports (`export`)
//! - JSON correction recipes (`recipe`)

pub mod export;
pub mod ingest;
pub mod recipe;
pub mod table;

pub use export::*;
pub use ingest::*;
pub use recipe::*;
pub use table::*;
