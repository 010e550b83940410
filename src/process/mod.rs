/// Processing layer: apply transforms to stored datasets and record lineage.
///
/// Architecture:
/// ```text
///   criteria (paths / globs)
///        │
///        ▼
///   ┌──────────┐
///   │ resolver  │  pattern matching, group reconciliation → aligned input sets
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐      ┌───────────┐
///   │  batch    │ ───▶ │   apply    │  one call: read inputs, run transform
///   └──────────┘      └───────────┘
///                           │
///              ┌────────────┼────────────┐
///              ▼                         ▼
///        ┌───────────┐            ┌──────────┐
///        │ versioner  │            │  writer   │  datasets + provenance attrs
///        └───────────┘            └──────────┘
///
///   maintenance: list / last / remove operation folders, repack files
/// ```

pub mod apply;
pub mod batch;
pub mod maintenance;
pub mod pattern;
pub mod resolver;
pub mod transform;
pub mod versioner;
pub mod writer;

pub use apply::{apply, Applied, ApplyRequest};
pub use batch::{run, Progress, SweepSummary};
pub use maintenance::{
    last_process, list_processes, operation_folders, remove_process, repack, repack_folder,
    RepackReport,
};
pub use resolver::{read_datasets, resolve, Criteria, RepeatPolicy};
pub use transform::{Func, Kwargs, OptionSpec, Output, Transform};
pub use versioner::{output_locations, OperationFolder};
pub use writer::{write_output_at, Provenance};
