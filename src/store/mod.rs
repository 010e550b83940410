/// Store layer: a single-file hierarchical array container.
///
/// Architecture:
/// ```text
///   store file
///        │
///        ▼
///   ┌──────────┐
///   │  journal  │  header + append-only records (bincode)
///   └──────────┘
///        │ replay
///        ▼
///   ┌──────────┐
///   │   model   │  Group / Dataset tree, Array payloads, AttrValue maps
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │   file    │  Store handle: open, read, mutate, copy, close
///   └──────────┘
/// ```

pub mod file;
pub mod journal;
pub mod model;

pub use file::{file_size, Store};
pub use model::{Array, AttrValue, Attrs, Dataset, Group, Node};

/// Root group holding imported raw data.
pub const DATASETS_GROUP: &str = "datasets";

/// Root group holding derived data, one operation folder per run.
pub const PROCESS_GROUP: &str = "process";
