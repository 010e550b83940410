/// Import layer: read spectral tables and store them as raw datasets.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Table of rows (x, y, metadata)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  import   │  datasets/{stem}-{row:04}/{x,y} + metadata attributes
///   └──────────┘
/// ```

pub mod loader;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::store::{Array, AttrValue, Store, DATASETS_GROUP};

pub use loader::load_table;

// ---------------------------------------------------------------------------
// Table – rows read from a tabular file
// ---------------------------------------------------------------------------

/// One row of a spectral table: an x axis, its y values, and the remaining
/// columns. Null cells are left out of `metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub metadata: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// import_table
// ---------------------------------------------------------------------------

/// Load `path` and write every row into `store` under
/// `datasets/{stem}-{row:04}`. Returns the group paths written, in row order.
pub fn import_table(store: &mut Store, path: &Path) -> Result<Vec<String>> {
    let table = load_table(path).with_context(|| format!("loading {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("file name is not valid UTF-8")?;

    let mut groups = Vec::with_capacity(table.len());
    for (index, row) in table.rows.into_iter().enumerate() {
        let group = format!("{DATASETS_GROUP}/{stem}-{index:04}");
        for (name, values) in [("x", row.x), ("y", row.y)] {
            let dataset = format!("{group}/{name}");
            store
                .write_dataset(&dataset, Array::from_vec(values))
                .with_context(|| format!("writing {dataset}"))?;
            for (key, value) in &row.metadata {
                store.set_attr(&dataset, key, value.clone())?;
            }
        }
        groups.push(group);
    }

    info!("imported {} rows from {}", groups.len(), path.display());
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rows_become_dataset_groups_with_metadata() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("scan.csv");
        std::fs::write(
            &csv_path,
            "x,y,sample,conc\n\"1;2;3\",\"0.1;0.2;0.3\",A,1.5\n\"1;2\",\"5;6\",B,\n",
        )
        .unwrap();

        let mut store = Store::create(&dir.path().join("s.lineage")).unwrap();
        let groups = import_table(&mut store, &csv_path).unwrap();
        assert_eq!(groups, vec!["datasets/scan-0000", "datasets/scan-0001"]);

        assert_eq!(store.read_array("datasets/scan-0000/y").unwrap().data(), &[0.1, 0.2, 0.3]);
        let attrs = store.attrs("datasets/scan-0000/x").unwrap();
        assert_eq!(attrs["sample"], AttrValue::from("A"));
        assert_eq!(attrs["conc"], AttrValue::Float(1.5));

        let attrs = store.attrs("datasets/scan-0001/y").unwrap();
        assert!(!attrs.contains_key("conc"));
    }
}
