//! Listing, removing, and compacting operation folders.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{info, warn};

use super::pattern;
use super::versioner::OperationFolder;
use crate::confirm::Confirm;
use crate::error::{Error, Result};
use crate::store::{file_size, Store, PROCESS_GROUP};

/// Suffix of the temporary store written during a repack.
pub const CLEAN_COPY_SUFFIX: &str = "_CleanCopy";

/// Names of the folders under the process group matching `*{filter}*`,
/// sorted.
pub fn operation_folders(store_path: &Path, filter: &str) -> Result<Vec<String>> {
    let store = Store::open(store_path)?;
    let wanted = pattern::compile(&format!("*{filter}*"))?;
    let children = match store.children(PROCESS_GROUP) {
        Ok(children) => children,
        Err(Error::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names: Vec<String> = children
        .into_iter()
        .filter(|name| pattern::matches(&wanted, name))
        .collect();
    names.sort();
    Ok(names)
}

/// Sorted, de-duplicated function names of the matching operation folders.
pub fn list_processes(store_path: &Path, filter: &str) -> Result<Vec<String>> {
    let functions: BTreeSet<String> = operation_folders(store_path, filter)?
        .iter()
        .filter_map(|name| OperationFolder::parse(name))
        .map(|folder| folder.function)
        .collect();
    Ok(functions.into_iter().collect())
}

/// The highest-numbered matching operation folder.
pub fn last_process(store_path: &Path, filter: &str) -> Result<Option<String>> {
    Ok(operation_folders(store_path, filter)?
        .iter()
        .filter_map(|name| OperationFolder::parse(name))
        .max_by_key(|folder| folder.number)
        .map(|folder| folder.to_string()))
}

/// Delete the operation folder `name` and everything below it.
///
/// `name` must be a single `NNN-function` folder name. The freed bytes stay
/// in the file until [`repack`] runs.
pub fn remove_process(store_path: &Path, name: &str) -> Result<bool> {
    if name.contains('/') || OperationFolder::parse(name).is_none() {
        return Err(Error::InvalidPath {
            path: name.to_string(),
            reason: "not an operation folder name".into(),
        });
    }
    let path = format!("{PROCESS_GROUP}/{name}");
    let mut store = Store::open_rw(store_path)?;
    let removed = store.remove(&path)?;
    store.close()?;
    if removed {
        info!("{path} has been removed");
    } else {
        warn!("{path} not found");
    }
    Ok(removed)
}

/// Sizes of a store before and after a repack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepackReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// The sibling path a repack of `store_path` writes into.
pub fn clean_copy_path(store_path: &Path) -> PathBuf {
    let stem = store_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match store_path.extension() {
        Some(ext) => format!("{stem}{CLEAN_COPY_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{CLEAN_COPY_SUFFIX}"),
    };
    store_path.with_file_name(name)
}

/// Fail if `store_path` is itself a repack copy or a stale copy of it exists.
fn check_hazard(store_path: &Path) -> Result<()> {
    let is_copy = store_path
        .file_stem()
        .is_some_and(|s| s.to_string_lossy().ends_with(CLEAN_COPY_SUFFIX));
    if is_copy {
        return Err(Error::RepackHazard(store_path.to_path_buf()));
    }
    let copy_path = clean_copy_path(store_path);
    if copy_path.exists() {
        return Err(Error::RepackHazard(copy_path));
    }
    Ok(())
}

const REPACK_WARNING: &str = "Repacking copies every group into a sibling file, deletes the \
     original, and renames the copy into place. Files may be lost if this is interrupted; \
     back up first.";

/// Rewrite the store without the space left behind by removals.
///
/// Every top-level group is copied node for node into a sibling store, the
/// original is deleted, and the copy renamed into its place. The delete and
/// rename cannot be undone if interrupted, so the caller must confirm unless
/// `force` is set; a declined confirmation returns `None`. A leftover copy
/// from an earlier failed repack stops the repack before anything is touched.
pub fn repack(
    store_path: &Path,
    force: bool,
    confirm: &dyn Confirm,
) -> Result<Option<RepackReport>> {
    check_hazard(store_path)?;

    let message = format!("{REPACK_WARNING} Repack {}?", store_path.display());
    if !force && !confirm.confirm(&message) {
        info!("repack of {} aborted", store_path.display());
        return Ok(None);
    }
    repack_checked(store_path).map(Some)
}

fn repack_checked(store_path: &Path) -> Result<RepackReport> {
    let copy_path = clean_copy_path(store_path);
    let bytes_before = file_size(store_path)?;
    {
        let source = Store::open(store_path)?;
        let mut copy = Store::create(&copy_path)?;
        source.copy_into(&mut copy)?;
        copy.close()?;
    }
    fs::remove_file(store_path)?;
    fs::rename(&copy_path, store_path)?;
    let bytes_after = file_size(store_path)?;

    info!(
        "repacked {}: {bytes_before} -> {bytes_after} bytes",
        store_path.display()
    );
    Ok(RepackReport {
        bytes_before,
        bytes_after,
    })
}

/// Repack every `*.{extension}` store directly inside `dir`, in name order.
///
/// One confirmation covers the whole folder. Every file is checked for
/// repack hazards before the first one is touched. Returns an empty list
/// when the confirmation is declined.
pub fn repack_folder(
    dir: &Path,
    extension: &str,
    force: bool,
    confirm: &dyn Confirm,
) -> Result<Vec<(PathBuf, RepackReport)>> {
    let search = format!(
        "{}/*.{}",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(extension)
    );
    let entries = glob::glob(&search).map_err(|e| Error::InvalidPath {
        path: search.clone(),
        reason: e.msg.to_string(),
    })?;
    let mut stores = Vec::new();
    for entry in entries {
        stores.push(entry.map_err(|e| Error::Io(e.into_error()))?);
    }
    stores.sort();

    for store_path in &stores {
        check_hazard(store_path)?;
    }
    if stores.is_empty() {
        return Ok(Vec::new());
    }

    let listing: Vec<String> = stores
        .iter()
        .map(|p| format!("    {}", p.display()))
        .collect();
    let message = format!(
        "{REPACK_WARNING} The following stores will be repacked:\n{}\nContinue?",
        listing.join("\n")
    );
    if !force && !confirm.confirm(&message) {
        info!("repack of {} aborted", dir.display());
        return Ok(Vec::new());
    }

    stores
        .into_iter()
        .map(|store_path| {
            let report = repack_checked(&store_path)?;
            Ok((store_path, report))
        })
        .collect()
}
