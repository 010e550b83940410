use std::path::Path;

use log::{debug, warn};

use super::pattern;
use super::resolver::{match_group, searchable_paths};
use super::transform::{Kwargs, Output, Transform};
use super::versioner::{self, OperationFolder};
use super::writer::{utc_timestamp, write_output, Provenance, WriteOutcome};
use crate::confirm::Confirm;
use crate::error::{Error, Result};
use crate::store::model::{normalize_path, split_path};
use crate::store::{Array, AttrValue, Attrs, Store, PROCESS_GROUP};

// ---------------------------------------------------------------------------
// ApplyRequest – the inputs and options of one application
// ---------------------------------------------------------------------------

/// Describes one application of a transform.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Input dataset paths; entries containing wildcards are resolved and
    /// their first match is used.
    pub inputs: Vec<String>,
    /// Output dataset names. Defaults to the leaf name of the first input.
    pub output_names: Option<Vec<String>>,
    /// Group inside the operation folder. Defaults to the first input's
    /// parent group name.
    pub group_name: Option<String>,
    /// Input attributes passed to the transform as `source_<key>` kwargs.
    pub attrs_to_use: Vec<String>,
    /// Input attributes copied onto every output.
    pub attrs_to_propagate: Vec<String>,
    /// Allocate a new operation folder (`true`) or reuse the latest one of
    /// the same function (`false`).
    pub increment: bool,
    pub process_folder: String,
    pub kwargs: Kwargs,
    /// Overwrite existing outputs without asking.
    pub force: bool,
}

impl Default for ApplyRequest {
    fn default() -> Self {
        ApplyRequest {
            inputs: Vec::new(),
            output_names: None,
            group_name: None,
            attrs_to_use: Vec::new(),
            attrs_to_propagate: Vec::new(),
            increment: true,
            process_folder: PROCESS_GROUP.to_string(),
            kwargs: Kwargs::new(),
            force: false,
        }
    }
}

impl ApplyRequest {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApplyRequest {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn group(mut self, name: &str) -> Self {
        self.group_name = Some(name.to_string());
        self
    }

    pub fn use_attrs(mut self, keys: &[&str]) -> Self {
        self.attrs_to_use = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn propagate_attrs(mut self, keys: &[&str]) -> Self {
        self.attrs_to_propagate = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn increment(mut self, increment: bool) -> Self {
        self.increment = increment;
        self
    }

    pub fn process_folder(mut self, folder: &str) -> Self {
        self.process_folder = folder.to_string();
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// The result of an application that produced outputs.
#[derive(Debug, Clone)]
pub struct Applied {
    pub operation: OperationFolder,
    /// Values returned by the transform, in output-name order.
    pub outputs: Vec<Output>,
    /// Dataset paths written by this call.
    pub written: Vec<String>,
    /// Existing dataset paths kept because an overwrite was declined.
    pub kept: Vec<String>,
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Inputs gathered from the store before the transform runs.
struct Gathered {
    paths: Vec<String>,
    arrays: Vec<Array>,
    used: Attrs,
    propagated: Attrs,
}

/// Apply `transform` to the request's inputs and record its outputs under a
/// versioned operation folder.
///
/// Returns `None` when an input pattern matched nothing or when the
/// transform returned nothing. An output count that differs from the number
/// of output names fails before anything is written.
pub fn apply(
    store_path: &Path,
    transform: &dyn Transform,
    request: &ApplyRequest,
    confirm: &dyn Confirm,
) -> Result<Option<Applied>> {
    let gathered = {
        let store = Store::open(store_path)?;
        match gather(&store, request)? {
            Some(g) => g,
            None => return Ok(None),
        }
    };

    let first = &gathered.paths[0];
    let output_names = match &request.output_names {
        Some(names) => names.clone(),
        None => vec![leaf_name(first, 0)?],
    };
    let group_name = match &request.group_name {
        Some(name) => name.clone(),
        None => leaf_name(first, 1)?,
    };

    let mut kwargs = request.kwargs.clone();
    for (key, value) in &gathered.used {
        kwargs.insert(format!("source_{key}"), value.clone());
    }

    let result = transform
        .call(&gathered.arrays, &kwargs)
        .map_err(|source| Error::Transform {
            function: transform.name().to_string(),
            source,
        })?;
    let Some(outputs) = result else {
        debug!("{} returned nothing; no output written", transform.name());
        return Ok(None);
    };
    if outputs.len() != output_names.len() {
        return Err(Error::OutputArity {
            function: transform.name().to_string(),
            expected: output_names.len(),
            actual: outputs.len(),
        });
    }

    let mut store = Store::open_rw(store_path)?;
    let folder = versioner::select(
        &store,
        &request.process_folder,
        transform.name(),
        request.increment,
    )?;
    let provenance = Provenance {
        folder: &folder,
        operation_name: transform.qualified_name(),
        sources: &gathered.paths,
        options: transform.options(),
        kwargs: &kwargs,
        propagated: &gathered.propagated,
        timestamp: utc_timestamp(),
    };

    let mut written = Vec::new();
    let mut kept = Vec::new();
    for (name, output) in output_names.iter().zip(&outputs) {
        let path = format!("{}/{folder}/{group_name}/{name}", request.process_folder);
        match write_output(&mut store, &path, name, output, &provenance, request.force, confirm)? {
            WriteOutcome::Written => written.push(path),
            WriteOutcome::Kept => kept.push(path),
        }
    }
    store.close()?;

    Ok(Some(Applied {
        operation: folder,
        outputs,
        written,
        kept,
    }))
}

/// Resolve input paths and load payloads plus requested attributes.
fn gather(store: &Store, request: &ApplyRequest) -> Result<Option<Gathered>> {
    if request.inputs.is_empty() {
        return Err(Error::InvalidPath {
            path: String::new(),
            reason: "at least one input path is required".into(),
        });
    }

    let searchable = if request.inputs.iter().any(|i| pattern::is_pattern(i)) {
        searchable_paths(store)?
    } else {
        Vec::new()
    };
    let mut paths = Vec::with_capacity(request.inputs.len());
    for input in &request.inputs {
        if !pattern::is_pattern(input) {
            paths.push(normalize_path(input)?);
            continue;
        }
        let matches = match_group(&searchable, std::slice::from_ref(input))?;
        match matches.into_iter().next() {
            Some(path) => paths.push(path),
            None => {
                warn!("no input datasets found for '{input}'");
                return Ok(None);
            }
        }
    }

    let mut arrays = Vec::with_capacity(paths.len());
    let mut used = Attrs::new();
    let mut propagated = Attrs::new();
    for path in &paths {
        let dataset = store.dataset(path)?;
        arrays.push(dataset.array.clone());
        // First input owning a key wins.
        for key in &request.attrs_to_use {
            if let Some(value) = dataset.attrs.get(key) {
                used.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        for key in &request.attrs_to_propagate {
            if let Some(value) = dataset.attrs.get(key) {
                propagated.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    Ok(Some(Gathered {
        paths,
        arrays,
        used,
        propagated,
    }))
}

/// The path segment `depth` levels above the leaf (0 = the leaf itself).
fn leaf_name(path: &str, depth: usize) -> Result<String> {
    let parts = split_path(path)?;
    parts
        .len()
        .checked_sub(depth + 1)
        .map(|i| parts[i].to_string())
        .ok_or_else(|| Error::InvalidPath {
            path: path.to_string(),
            reason: "too shallow to derive a name".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::Decline;
    use crate::process::transform::{Func, OptionSpec};
    use crate::process::writer::{ATTR_OPERATION_NAME, ATTR_OPERATION_NUMBER, ATTR_SOURCE};
    use tempfile::tempdir;

    fn sample_store(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("sample.lineage");
        let mut store = Store::create(&path).unwrap();
        store
            .write_dataset("datasets/sample/values", Array::from_vec(vec![1.0, 2.0, 3.0]))
            .unwrap();
        store
            .set_attr("datasets/sample/values", "scale", AttrValue::Float(2.0))
            .unwrap();
        store
            .write_dataset("datasets/sample/offsets", Array::from_vec(vec![10.0, 20.0, 30.0]))
            .unwrap();
        store.close().unwrap();
        path
    }

    #[test]
    fn add_one_lands_in_first_operation_folder() {
        let dir = tempdir().unwrap();
        let path = sample_store(dir.path());
        let add_one = Func::elementwise("add_one", |v| v + 1.0).in_module("demo");

        let applied = apply(
            &path,
            &add_one,
            &ApplyRequest::new(["datasets/sample/values"]),
            &Decline,
        )
        .unwrap()
        .unwrap();
        assert_eq!(applied.operation.to_string(), "001-add_one");
        assert_eq!(applied.written, vec!["process/001-add_one/sample/values"]);

        let store = Store::open(&path).unwrap();
        let out = "process/001-add_one/sample/values";
        assert_eq!(store.read_array(out).unwrap().data(), &[2.0, 3.0, 4.0]);
        let attrs = store.attrs(out).unwrap();
        assert_eq!(attrs[ATTR_OPERATION_NUMBER], AttrValue::from("001"));
        assert_eq!(attrs[ATTR_OPERATION_NAME], AttrValue::from("demo.add_one"));
        assert_eq!(
            attrs[ATTR_SOURCE],
            AttrValue::StrList(vec!["datasets/sample/values".into()])
        );
    }

    #[test]
    fn source_attrs_reach_the_transform_as_kwargs() {
        let dir = tempdir().unwrap();
        let path = sample_store(dir.path());
        let scaled = Func::new("scaled", |inputs, kwargs| {
            let scale = kwargs
                .get("source_scale")
                .and_then(AttrValue::as_f64)
                .ok_or_else(|| anyhow::anyhow!("missing source_scale"))?;
            Ok(Some(vec![Output::Plain(inputs[0].map(|v| v * scale))]))
        })
        .with_options(OptionSpec::new().option("source_scale"));

        let request = ApplyRequest::new(["datasets/sample/*val*"]).use_attrs(&["scale"]);
        apply(&path, &scaled, &request, &Decline).unwrap().unwrap();

        let store = Store::open(&path).unwrap();
        let out = "process/001-scaled/sample/values";
        assert_eq!(store.read_array(out).unwrap().data(), &[2.0, 4.0, 6.0]);
        assert_eq!(store.attrs(out).unwrap()["kwargs_source_scale"], AttrValue::Float(2.0));
    }

    #[test]
    fn unmatched_pattern_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = sample_store(dir.path());
        let f = Func::elementwise("f", |v| v);
        let request = ApplyRequest::new(["datasets/*/missing"]);
        let result = apply(&path, &f, &request, &Decline).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn transform_errors_write_nothing() {
        let dir = tempdir().unwrap();
        let path = sample_store(dir.path());
        let failing = Func::new("failing", |_, _| anyhow::bail!("boom"));
        let err = apply(
            &path,
            &failing,
            &ApplyRequest::new(["datasets/sample/values"]),
            &Decline,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Transform { .. }));
        assert!(Store::open(&path).unwrap().children("process").unwrap().is_empty());
    }

    #[test]
    fn failing_second_output_leaves_no_partial_folder() {
        let dir = tempdir().unwrap();
        let path = sample_store(dir.path());
        let twice = Func::new("twice", |inputs, _| {
            Ok(Some(vec![
                Output::Plain(inputs[0].clone()),
                Output::Plain(inputs[0].clone()),
            ]))
        });
        // The second output would live below the first, which is a dataset.
        let request = ApplyRequest::new(["datasets/sample/values"]).outputs(["x", "x/y"]);

        let err = apply(&path, &twice, &request, &Decline).unwrap_err();
        assert!(matches!(err, Error::NotAGroup(_)));
        let store = Store::open(&path).unwrap();
        assert!(store.children(PROCESS_GROUP).unwrap().is_empty());
        assert!(store.dataset_paths(PROCESS_GROUP).unwrap().is_empty());
    }

    #[test]
    fn leaf_name_walks_up_the_path() {
        assert_eq!(leaf_name("datasets/sample/values", 0).unwrap(), "values");
        assert_eq!(leaf_name("datasets/sample/values", 1).unwrap(), "sample");
        assert!(leaf_name("values", 1).is_err());
    }
}
