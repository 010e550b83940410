use std::fmt;

use crate::error::{Error, Result};
use crate::store::model::split_path;
use crate::store::{Store, DATASETS_GROUP};

/// Digits used for the zero-padded sequence number of a folder name.
pub const SEQUENCE_WIDTH: usize = 3;

/// A versioned output folder under the process group: `{number:03}-{function}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperationFolder {
    pub number: u32,
    pub function: String,
}

impl OperationFolder {
    pub fn new(number: u32, function: &str) -> Self {
        OperationFolder {
            number,
            function: function.to_string(),
        }
    }

    /// Parse a folder name. Names without a numeric prefix are not
    /// operation folders.
    pub fn parse(name: &str) -> Option<Self> {
        let (number, function) = name.split_once('-')?;
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) || function.is_empty() {
            return None;
        }
        Some(OperationFolder {
            number: number.parse().ok()?,
            function: function.to_string(),
        })
    }

    /// The zero-padded sequence label, e.g. `"001"`.
    pub fn number_label(&self) -> String {
        format!("{:0width$}", self.number, width = SEQUENCE_WIDTH)
    }
}

impl fmt::Display for OperationFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number_label(), self.function)
    }
}

/// Every operation folder directly under `process_folder`, ordered by number.
pub fn existing(store: &Store, process_folder: &str) -> Result<Vec<OperationFolder>> {
    let names = match store.children(process_folder) {
        Ok(names) => names,
        Err(Error::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut folders: Vec<OperationFolder> = names
        .iter()
        .filter_map(|n| OperationFolder::parse(n))
        .collect();
    folders.sort();
    Ok(folders)
}

/// The number the next new folder gets: one past the highest in use.
pub fn next_number(store: &Store, process_folder: &str) -> Result<u32> {
    let folders = existing(store, process_folder)?;
    let Some(highest) = folders.iter().max_by_key(|f| f.number) else {
        return Ok(1);
    };
    highest.number.checked_add(1).ok_or_else(|| Error::InvalidPath {
        path: format!("{process_folder}/{highest}"),
        reason: "operation numbers are exhausted".into(),
    })
}

/// Pick the folder a call of `function` writes into.
///
/// With `increment` a fresh number is allocated. Without it the most recent
/// folder of the same function is reused; a function with no folder yet
/// still gets a fresh one.
pub fn select(
    store: &Store,
    process_folder: &str,
    function: &str,
    increment: bool,
) -> Result<OperationFolder> {
    if !increment {
        let latest = existing(store, process_folder)?
            .into_iter()
            .filter(|f| f.function == function)
            .max_by_key(|f| f.number);
        if let Some(folder) = latest {
            return Ok(folder);
        }
    }
    Ok(OperationFolder::new(
        next_number(store, process_folder)?,
        function,
    ))
}

/// Folder and group locations for writing outputs by hand.
///
/// The folder gets the next free number, unless `overwrite_if_same` is set
/// and the most recent folder belongs to `function`, in which case that one
/// is reused. Each group name is either a bare name or a dataset path under
/// `datasets/` or an operation folder, whose middle part becomes the group:
/// `datasets/scan/a/x` and `process/003-f/scan/a/x` both give `scan/a`.
pub fn output_locations(
    store: &Store,
    process_folder: &str,
    function: &str,
    group_names: &[&str],
    overwrite_if_same: bool,
) -> Result<(OperationFolder, Vec<String>)> {
    let latest = existing(store, process_folder)?
        .into_iter()
        .max_by_key(|f| f.number);
    let folder = match latest {
        Some(latest) if overwrite_if_same && latest.function == function => latest,
        _ => OperationFolder::new(next_number(store, process_folder)?, function),
    };
    let locations = group_names
        .iter()
        .map(|name| {
            let group = group_location(name, process_folder)?;
            Ok(format!("{process_folder}/{folder}/{group}"))
        })
        .collect::<Result<_>>()?;
    Ok((folder, locations))
}

fn group_location(name: &str, process_folder: &str) -> Result<String> {
    let parts = split_path(name)?;
    if parts.len() == 1 {
        return Ok(parts[0].to_string());
    }
    let joined = parts.join("/");
    let below = if let Some(rest) = joined.strip_prefix(&format!("{DATASETS_GROUP}/")) {
        Some(rest)
    } else {
        joined
            .strip_prefix(&format!("{process_folder}/"))
            .and_then(|rest| rest.split_once('/'))
            .map(|(_, rest)| rest)
    };
    below
        .and_then(|rest| rest.rsplit_once('/'))
        .map(|(group, _)| group.to_string())
        .ok_or_else(|| Error::InvalidPath {
            path: name.to_string(),
            reason: "expected a dataset path under the datasets or process group".into(),
        })
}
