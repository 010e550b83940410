//! Lineage-tracked processing of array data held in a single store file.
//!
//! Raw data lives under `datasets/`; every transform application writes its
//! outputs under `process/NNN-function/` together with attributes recording
//! where they came from and how they were made.

pub mod confirm;
pub mod error;
pub mod import;
pub mod process;
pub mod store;

pub use confirm::{Confirm, Decline};
pub use error::{Error, Result};
pub use store::{Array, AttrValue, Attrs, Store};
