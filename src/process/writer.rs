use log::{debug, info};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::transform::{Kwargs, OptionSpec, Output};
use super::versioner::OperationFolder;
use crate::confirm::{Confirm, Decline};
use crate::error::{Error, Result};
use crate::store::{AttrValue, Attrs, Store};

pub const ATTR_PATH: &str = "path";
pub const ATTR_SHAPE: &str = "shape";
pub const ATTR_NAME: &str = "name";
pub const ATTR_OPERATION_NAME: &str = "operation name";
pub const ATTR_OPERATION_NUMBER: &str = "operation number";
pub const ATTR_TIME: &str = "time";
pub const ATTR_SOURCE: &str = "source";
/// Marker stored instead of per-option attributes for foreign transforms.
pub const ATTR_FOREIGN: &str = "foreign_function";
/// Prefix of the per-option attributes.
pub const KWARG_PREFIX: &str = "kwargs_";

/// Everything recorded about how an output was produced.
#[derive(Debug, Clone)]
pub struct Provenance<'a> {
    pub folder: &'a OperationFolder,
    /// `module.function` of the transform.
    pub operation_name: String,
    pub sources: &'a [String],
    /// `None` for foreign transforms.
    pub options: Option<&'a OptionSpec>,
    pub kwargs: &'a Kwargs,
    /// Attributes copied from the inputs onto every output.
    pub propagated: &'a Attrs,
    pub timestamp: String,
}

/// Whether an output landed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An existing dataset was kept because the overwrite was declined.
    Kept,
}

/// Current UTC time as an RFC 3339 string.
pub fn utc_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Write one output at `path` with its full provenance.
///
/// An existing dataset is only replaced when `force` is set or `confirm`
/// agrees; otherwise it is left untouched, attributes included.
pub fn write_output(
    store: &mut Store,
    path: &str,
    name: &str,
    output: &Output,
    provenance: &Provenance<'_>,
    force: bool,
    confirm: &dyn Confirm,
) -> Result<WriteOutcome> {
    if store.contains(path) {
        let message = format!("{name} already exists in {path}. Overwrite the dataset?");
        if !force && !confirm.confirm(&message) {
            info!("kept existing dataset {path}");
            return Ok(WriteOutcome::Kept);
        }
        info!("overwriting {path}");
    }

    store.write_dataset(path, output.data().clone())?;
    if let Some(extra) = output.attributes() {
        for (key, value) in extra {
            store.set_attr(path, key, value.clone())?;
        }
    }
    for (key, value) in provenance.propagated {
        store.set_attr(path, key, value.clone())?;
    }
    write_generic_attributes(store, path, name, provenance)?;
    write_kwargs_as_attributes(store, path, provenance.options, provenance.kwargs)?;
    debug!("wrote {path}");
    Ok(WriteOutcome::Written)
}

/// Shape, name, operation identity, time, and sources.
pub fn write_generic_attributes(
    store: &mut Store,
    path: &str,
    name: &str,
    provenance: &Provenance<'_>,
) -> Result<()> {
    let shape = store.read_array(path)?.shape_attr();
    store.set_attr(path, ATTR_PATH, AttrValue::from(path))?;
    store.set_attr(path, ATTR_SHAPE, shape)?;
    store.set_attr(path, ATTR_NAME, AttrValue::from(name))?;
    store.set_attr(
        path,
        ATTR_OPERATION_NAME,
        AttrValue::Str(provenance.operation_name.clone()),
    )?;
    store.set_attr(
        path,
        ATTR_OPERATION_NUMBER,
        AttrValue::Str(provenance.folder.number_label()),
    )?;
    store.set_attr(path, ATTR_TIME, AttrValue::Str(provenance.timestamp.clone()))?;
    store.set_attr(path, ATTR_SOURCE, AttrValue::StrList(provenance.sources.to_vec()))?;
    Ok(())
}

/// One `kwargs_<option>` attribute per declared option: the bound value, else
/// the declared default, else the string `"None"`. Foreign transforms get the
/// single marker attribute instead.
pub fn write_kwargs_as_attributes(
    store: &mut Store,
    path: &str,
    options: Option<&OptionSpec>,
    kwargs: &Kwargs,
) -> Result<()> {
    let Some(options) = options else {
        return store.set_attr(path, ATTR_FOREIGN, AttrValue::Bool(true));
    };
    for (option, default) in options.iter() {
        let value = kwargs
            .get(option)
            .or(default)
            .cloned()
            .unwrap_or_else(|| AttrValue::from("None"));
        store.set_attr(path, &format!("{KWARG_PREFIX}{option}"), value)?;
    }
    Ok(())
}

/// Write one output into a group picked by hand, replacing whatever is there.
///
/// `location` is a group path as returned by
/// [`output_locations`](super::versioner::output_locations). The dataset is
/// named `name`, or after the leaf of the first source when `None`. Returns
/// the dataset path.
pub fn write_output_at(
    store: &mut Store,
    location: &str,
    name: Option<&str>,
    output: &Output,
    provenance: &Provenance<'_>,
) -> Result<String> {
    let name = match name {
        Some(name) => name.to_string(),
        None => provenance
            .sources
            .first()
            .and_then(|source| source.rsplit('/').next())
            .filter(|leaf| !leaf.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidPath {
                path: location.to_string(),
                reason: "no name given and no source to take one from".into(),
            })?,
    };
    let path = format!("{location}/{name}");
    write_output(store, &path, &name, output, provenance, true, &Decline)?;
    Ok(path)
}
