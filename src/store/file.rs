use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use super::journal::{write_record, Header, Record, RecordReader, HEADER_SIZE};
use super::model::{split_path, Array, AttrValue, Attrs, Dataset, Group, Node};
use super::{DATASETS_GROUP, PROCESS_GROUP};
use crate::error::{Error, Result};

/// An open handle on a store file.
///
/// The whole node tree is replayed into memory on open. Mutations update the
/// tree immediately and are buffered as log records until [`Store::close`]
/// appends them to the file in one write. Dropping a handle without closing
/// it discards the buffer, so a logical operation that fails before closing
/// leaves the file untouched.
pub struct Store {
    path: PathBuf,
    file: File,
    root: Group,
    writable: bool,
    pending: Vec<u8>,
}

impl Store {
    /// Create a new store holding the empty `datasets` and `process` groups.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        lock(&file, path, true)?;
        file.write_all(&Header::default().to_bytes())?;
        file.sync_all()?;

        let mut store = Store {
            path: path.to_path_buf(),
            file,
            root: Group::default(),
            writable: true,
            pending: Vec::new(),
        };
        store.create_group(DATASETS_GROUP)?;
        store.create_group(PROCESS_GROUP)?;
        store.flush()?;
        Ok(store)
    }

    /// Open an existing store for reading (shared lock).
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open an existing store for reading and writing (exclusive lock).
    pub fn open_rw(path: &Path) -> Result<Self> {
        Self::open_with(path, true)
    }

    /// Open for writing, creating the store first if the file is absent.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open_rw(path)
        } else {
            Self::create(path)
        }
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(writable)
            .open(path)?;
        lock(&file, path, writable)?;

        let mut reader = BufReader::new(&file);
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Format {
                    path: path.to_path_buf(),
                    reason: "file too short for a store header".into(),
                }
            } else {
                e.into()
            }
        })?;
        Header::from_bytes(path, &header_bytes)?;

        let mut root = Group::default();
        let mut records = RecordReader::new(reader);
        let mut count = 0usize;
        for record in records.by_ref() {
            apply_record(&mut root, &record?).map_err(|e| Error::Format {
                path: path.to_path_buf(),
                reason: format!("log replay failed at record {count}: {e}"),
            })?;
            count += 1;
        }
        if records.truncated() {
            warn!(
                "{}: ignoring partially written record after {count} records",
                path.display()
            );
            if writable {
                file.set_len(HEADER_SIZE as u64 + records.consumed())?;
            }
        }
        debug!("opened {} ({count} records)", path.display());

        Ok(Store {
            path: path.to_path_buf(),
            file,
            root,
            writable,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    // -- reading --

    pub fn node(&self, path: &str) -> Result<&Node> {
        let parts = split_path(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let group = group_at(&self.root, parents).ok_or_else(|| Error::NotFound(path.to_string()))?;
        group
            .children
            .get(*last)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    pub fn is_dataset(&self, path: &str) -> bool {
        self.node(path).map(Node::is_dataset).unwrap_or(false)
    }

    pub fn dataset(&self, path: &str) -> Result<&Dataset> {
        match self.node(path)? {
            Node::Dataset(d) => Ok(d),
            Node::Group(_) => Err(Error::NotADataset(path.to_string())),
        }
    }

    pub fn group(&self, path: &str) -> Result<&Group> {
        let parts = split_path(path)?;
        if parts.is_empty() {
            return Ok(&self.root);
        }
        match self.node(path)? {
            Node::Group(g) => Ok(g),
            Node::Dataset(_) => Err(Error::NotAGroup(path.to_string())),
        }
    }

    pub fn read_array(&self, path: &str) -> Result<&Array> {
        Ok(&self.dataset(path)?.array)
    }

    pub fn attrs(&self, path: &str) -> Result<&Attrs> {
        Ok(self.node(path)?.attrs())
    }

    /// Names of the direct children of a group, in traversal order.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.group(path)?.children.keys().cloned().collect())
    }

    /// Full paths of every dataset below `root`, depth-first in traversal order.
    /// A missing `root` yields no paths.
    pub fn dataset_paths(&self, root: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let group = match self.group(root) {
            Ok(g) => g,
            Err(Error::NotFound(_)) => return Ok(out),
            Err(e) => return Err(e),
        };
        let prefix = split_path(root)?.join("/");
        collect_datasets(group, &prefix, &mut out);
        Ok(out)
    }

    /// Box-drawing listing of the subtree below `root`.
    pub fn tree(&self, root: &str) -> Result<String> {
        let group = self.group(root)?;
        let mut out = String::new();
        let title = split_path(root)?.join("/");
        out.push_str(if title.is_empty() { "/" } else { &title });
        out.push('\n');
        render_tree(group, "", &mut out);
        Ok(out)
    }

    // -- writing --

    /// Create a group and any missing parents. Existing groups are left as is.
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.mutate(Record::CreateGroup {
            path: canonical(path)?,
        })
    }

    /// Write a dataset, creating parent groups as needed. Writing over an
    /// existing dataset replaces its payload and keeps its attributes.
    pub fn write_dataset(&mut self, path: &str, array: Array) -> Result<()> {
        self.mutate(Record::WriteDataset {
            path: canonical(path)?,
            array,
        })
    }

    pub fn set_attr(&mut self, path: &str, key: &str, value: AttrValue) -> Result<()> {
        self.mutate(Record::SetAttr {
            path: canonical(path)?,
            key: key.to_string(),
            value,
        })
    }

    /// Unlink a node and its subtree. The bytes stay in the file.
    /// Returns `false` if nothing was at `path`.
    pub fn remove(&mut self, path: &str) -> Result<bool> {
        if !self.contains(path) {
            return Ok(false);
        }
        self.mutate(Record::Remove {
            path: canonical(path)?,
        })?;
        Ok(true)
    }

    /// Copy every top-level node of this store, node for node, into `target`.
    pub fn copy_into(&self, target: &mut Store) -> Result<()> {
        for (name, node) in &self.root.children {
            copy_node(node, name, target)?;
        }
        Ok(())
    }

    /// Commit buffered records to disk and release the lock.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn mutate(&mut self, record: Record) -> Result<()> {
        if !self.writable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} was opened read-only", self.path.display()),
            )));
        }
        apply_record(&mut self.root, &record)?;
        write_record(&mut self.pending, &record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.pending)?;
        self.file.sync_data()?;
        debug!("{}: appended {} bytes", self.path.display(), self.pending.len());
        self.pending.clear();
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                "{}: discarding {} uncommitted bytes",
                self.path.display(),
                self.pending.len()
            );
        }
        let _ = FileExt::unlock(&self.file);
    }
}

/// Size of a store file on disk, in bytes.
pub fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)?.len())
}

fn lock(file: &File, path: &Path, exclusive: bool) -> Result<()> {
    let locked = if exclusive {
        FileExt::try_lock_exclusive(file)
    } else {
        FileExt::try_lock_shared(file)
    };
    locked.map_err(|e| {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            Error::Locked(path.to_path_buf())
        } else {
            e.into()
        }
    })
}

fn canonical(path: &str) -> Result<String> {
    let parts = split_path(path)?;
    if parts.is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "the root cannot be written".into(),
        });
    }
    Ok(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn group_at<'a>(root: &'a Group, parts: &[&str]) -> Option<&'a Group> {
    let mut group = root;
    for part in parts {
        match group.children.get(*part)? {
            Node::Group(g) => group = g,
            Node::Dataset(_) => return None,
        }
    }
    Some(group)
}

/// Walk to the group at `parts`, creating missing groups on the way.
fn require_group<'a>(root: &'a mut Group, parts: &[&str]) -> Result<&'a mut Group> {
    let mut group = root;
    for (depth, part) in parts.iter().enumerate() {
        let child = group
            .children
            .entry(part.to_string())
            .or_insert_with(|| Node::Group(Group::default()));
        group = match child {
            Node::Group(g) => g,
            Node::Dataset(_) => return Err(Error::NotAGroup(parts[..=depth].join("/"))),
        };
    }
    Ok(group)
}

fn apply_record(root: &mut Group, record: &Record) -> Result<()> {
    match record {
        Record::CreateGroup { path } => {
            require_group(root, &split_path(path)?)?;
        }
        Record::WriteDataset { path, array } => {
            let parts = split_path(path)?;
            let (last, parents) = parts
                .split_last()
                .ok_or_else(|| Error::NotADataset(path.clone()))?;
            let group = require_group(root, parents)?;
            match group.children.get_mut(*last) {
                Some(Node::Dataset(d)) => d.array = array.clone(),
                Some(Node::Group(_)) => return Err(Error::NotADataset(path.clone())),
                None => {
                    group.children.insert(
                        last.to_string(),
                        Node::Dataset(Dataset {
                            array: array.clone(),
                            attrs: Attrs::new(),
                        }),
                    );
                }
            }
        }
        Record::SetAttr { path, key, value } => {
            let parts = split_path(path)?;
            let attrs = match parts.split_last() {
                None => &mut root.attrs,
                Some((last, parents)) => {
                    let group = group_mut(root, parents)
                        .ok_or_else(|| Error::NotFound(path.clone()))?;
                    group
                        .children
                        .get_mut(*last)
                        .ok_or_else(|| Error::NotFound(path.clone()))?
                        .attrs_mut()
                }
            };
            attrs.insert(key.clone(), value.clone());
        }
        Record::Remove { path } => {
            let parts = split_path(path)?;
            let (last, parents) = parts
                .split_last()
                .ok_or_else(|| Error::NotFound(path.clone()))?;
            let group = group_mut(root, parents).ok_or_else(|| Error::NotFound(path.clone()))?;
            group
                .children
                .remove(*last)
                .ok_or_else(|| Error::NotFound(path.clone()))?;
        }
    }
    Ok(())
}

fn group_mut<'a>(root: &'a mut Group, parts: &[&str]) -> Option<&'a mut Group> {
    let mut group = root;
    for part in parts {
        match group.children.get_mut(*part)? {
            Node::Group(g) => group = g,
            Node::Dataset(_) => return None,
        }
    }
    Some(group)
}

fn collect_datasets(group: &Group, prefix: &str, out: &mut Vec<String>) {
    for (name, node) in &group.children {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match node {
            Node::Group(g) => collect_datasets(g, &path, out),
            Node::Dataset(_) => out.push(path),
        }
    }
}

fn copy_node(node: &Node, path: &str, target: &mut Store) -> Result<()> {
    match node {
        Node::Group(g) => {
            for (name, child) in &g.children {
                copy_node(child, &format!("{path}/{name}"), target)?;
            }
            // Children already created the group unless it is empty.
            if !target.contains(path) {
                target.create_group(path)?;
            }
            for (key, value) in &g.attrs {
                target.set_attr(path, key, value.clone())?;
            }
        }
        Node::Dataset(d) => {
            target.write_dataset(path, d.array.clone())?;
            for (key, value) in &d.attrs {
                target.set_attr(path, key, value.clone())?;
            }
        }
    }
    Ok(())
}

fn render_tree(group: &Group, indent: &str, out: &mut String) {
    let count = group.children.len();
    for (i, (name, node)) in group.children.iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(indent);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(name);
        out.push('\n');
        if let Node::Group(g) = node {
            let child_indent = format!("{indent}{}", if last { "    " } else { "│   " });
            render_tree(g, &child_indent, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_starts_with_root_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        Store::create(&path).unwrap().close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.children("").unwrap(), vec!["datasets", "process"]);
        assert!(Store::create(&path).is_err());
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        let mut store = Store::create(&path).unwrap();
        store
            .write_dataset("datasets/sample/values", Array::from_vec(vec![1.0, 2.0, 3.0]))
            .unwrap();
        store
            .set_attr("datasets/sample/values", "scale", AttrValue::Float(2.0))
            .unwrap();
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(
            store.read_array("/datasets/sample/values").unwrap().data(),
            &[1.0, 2.0, 3.0]
        );
        assert_eq!(
            store.attrs("datasets/sample/values").unwrap().get("scale"),
            Some(&AttrValue::Float(2.0))
        );
        assert_eq!(
            store.dataset_paths("datasets").unwrap(),
            vec!["datasets/sample/values"]
        );
    }

    #[test]
    fn dataset_cannot_shadow_group() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(&dir.path().join("s.lineage")).unwrap();
        store
            .write_dataset("datasets/a", Array::from_vec(vec![0.0]))
            .unwrap();
        assert!(matches!(
            store.write_dataset("datasets", Array::from_vec(vec![0.0])),
            Err(Error::NotADataset(_))
        ));
        assert!(matches!(
            store.create_group("datasets/a/b"),
            Err(Error::NotAGroup(_))
        ));
    }

    #[test]
    fn remove_keeps_bytes_until_repacked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        let mut store = Store::create(&path).unwrap();
        store
            .write_dataset("process/001-f/a/x", Array::from_vec(vec![1.0; 64]))
            .unwrap();
        store.close().unwrap();
        let before = file_size(&path).unwrap();

        let mut store = Store::open_rw(&path).unwrap();
        assert!(store.remove("process/001-f").unwrap());
        assert!(!store.remove("process/001-f").unwrap());
        store.close().unwrap();

        assert!(file_size(&path).unwrap() > before);
        let store = Store::open(&path).unwrap();
        assert!(store.children("process").unwrap().is_empty());
    }

    #[test]
    fn writer_drops_partial_tail_before_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        Store::create(&path).unwrap().close().unwrap();
        let clean = file_size(&path).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[200, 0, 0, 0, 0, 0, 0, 0, 1, 2]).unwrap();
        }

        let mut store = Store::open_rw(&path).unwrap();
        assert_eq!(file_size(&path).unwrap(), clean);
        store
            .write_dataset("datasets/a/x", Array::from_vec(vec![4.0]))
            .unwrap();
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.read_array("datasets/a/x").unwrap().data(), &[4.0]);
    }

    #[test]
    fn dropping_without_close_discards_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        drop(Store::create(&path).unwrap());
        let committed = file_size(&path).unwrap();

        let mut store = Store::open_rw(&path).unwrap();
        store
            .write_dataset("process/001-f/a/x", Array::from_vec(vec![1.0]))
            .unwrap();
        drop(store);

        assert_eq!(file_size(&path).unwrap(), committed);
        let store = Store::open(&path).unwrap();
        assert_eq!(store.children("").unwrap(), vec!["datasets", "process"]);
        assert!(store.children("process").unwrap().is_empty());
    }

    #[test]
    fn read_only_handles_reject_writes_and_writers_are_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.lineage");
        Store::create(&path).unwrap().close().unwrap();

        let mut reader = Store::open(&path).unwrap();
        assert!(reader.create_group("datasets/x").is_err());
        assert!(matches!(Store::open_rw(&path), Err(Error::Locked(_))));
    }

    #[test]
    fn tree_lists_subtree() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(&dir.path().join("s.lineage")).unwrap();
        store
            .write_dataset("datasets/s1/x", Array::from_vec(vec![0.0]))
            .unwrap();
        store
            .write_dataset("datasets/s2/x", Array::from_vec(vec![0.0]))
            .unwrap();
        let tree = store.tree("datasets").unwrap();
        assert_eq!(tree, "datasets\n├── s1\n│   └── x\n└── s2\n    └── x\n");
    }
}
