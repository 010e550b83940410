use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::warn;

use super::pattern;
use crate::error::{Error, Result};
use crate::store::{Array, Store, DATASETS_GROUP, PROCESS_GROUP};

// ---------------------------------------------------------------------------
// Criteria – what to search for
// ---------------------------------------------------------------------------

/// Search criteria for input datasets.
///
/// * `Single` and `Flat` produce one group holding every match, in order.
/// * `Grouped` produces one group per inner list; groups are later zipped
///   position-wise so call *i* receives the *i*-th match of every group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    Single(String),
    Flat(Vec<String>),
    Grouped(Vec<Vec<String>>),
}

impl Criteria {
    fn groups(&self) -> Vec<Vec<String>> {
        match self {
            Criteria::Single(p) => vec![vec![p.clone()]],
            Criteria::Flat(ps) => vec![ps.clone()],
            Criteria::Grouped(gs) => gs.clone(),
        }
    }
}

impl From<&str> for Criteria {
    fn from(p: &str) -> Self {
        Criteria::Single(p.to_string())
    }
}

impl From<String> for Criteria {
    fn from(p: String) -> Self {
        Criteria::Single(p)
    }
}

impl From<Vec<&str>> for Criteria {
    fn from(ps: Vec<&str>) -> Self {
        Criteria::Flat(ps.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Criteria {
    fn from(ps: Vec<String>) -> Self {
        Criteria::Flat(ps)
    }
}

impl From<Vec<Vec<&str>>> for Criteria {
    fn from(gs: Vec<Vec<&str>>) -> Self {
        Criteria::Grouped(
            gs.into_iter()
                .map(|g| g.into_iter().map(String::from).collect())
                .collect(),
        )
    }
}

impl From<Vec<Vec<String>>> for Criteria {
    fn from(gs: Vec<Vec<String>>) -> Self {
        Criteria::Grouped(gs)
    }
}

// ---------------------------------------------------------------------------
// RepeatPolicy – reconciling uneven group lengths
// ---------------------------------------------------------------------------

/// How shorter groups are stretched to the longest group's length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatPolicy {
    /// Cycle the whole group: `[A, B]` → `[A, B, A, B]`.
    Alt,
    /// Repeat each element in place: `[A, B]` → `[A, A, B, B]`.
    Block,
}

impl FromStr for RepeatPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "alt" | "a" => Ok(RepeatPolicy::Alt),
            "block" | "b" => Ok(RepeatPolicy::Block),
            other => Err(format!("unknown repeat policy '{other}' (expected alt or block)")),
        }
    }
}

impl fmt::Display for RepeatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatPolicy::Alt => write!(f, "alt"),
            RepeatPolicy::Block => write!(f, "block"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Every dataset path under `datasets` and `process`, in traversal order.
pub fn searchable_paths(store: &Store) -> Result<Vec<String>> {
    let mut paths = store.dataset_paths(DATASETS_GROUP)?;
    paths.extend(store.dataset_paths(PROCESS_GROUP)?);
    Ok(paths)
}

/// Match every pattern of a group against `paths`, in pattern order.
pub fn match_group(paths: &[String], patterns: &[String]) -> Result<Vec<String>> {
    let mut matched = Vec::new();
    for source in patterns {
        let compiled = pattern::compile(source)?;
        matched.extend(paths.iter().filter(|p| pattern::matches(&compiled, p)).cloned());
    }
    Ok(matched)
}

/// Resolve `criteria` against the store into matched path groups, with
/// lengths reconciled according to `repeat`.
pub fn resolve(
    store: &Store,
    criteria: &Criteria,
    repeat: Option<RepeatPolicy>,
) -> Result<Vec<Vec<String>>> {
    let paths = searchable_paths(store)?;
    let groups: Vec<Vec<String>> = criteria
        .groups()
        .iter()
        .map(|patterns| match_group(&paths, patterns))
        .collect::<Result<_>>()?;

    if groups.len() == 1 {
        if groups[0].is_empty() {
            warn!("no input datasets found for {criteria:?}");
        }
        return Ok(groups);
    }
    Ok(reconcile(groups, repeat))
}

/// Bring groups to a common length.
///
/// Without a policy every group is truncated to the shortest. With a policy
/// each group is repeated `longest / len` times; a group whose length does
/// not divide the longest leaves the groups uneven, and the remainder is
/// truncated to the shortest.
pub fn reconcile(groups: Vec<Vec<String>>, repeat: Option<RepeatPolicy>) -> Vec<Vec<String>> {
    let lengths: Vec<usize> = groups.iter().map(Vec::len).collect();
    let longest = lengths.iter().copied().max().unwrap_or(0);
    let shortest = lengths.iter().copied().min().unwrap_or(0);
    if longest == shortest {
        return groups;
    }

    let groups = match repeat {
        None => {
            warn!(
                "input group lengths differ ({lengths:?}) and no repeat policy is set; \
                 truncating every group to {shortest}"
            );
            groups
        }
        Some(policy) => groups
            .into_iter()
            .map(|group| {
                if group.is_empty() {
                    return group;
                }
                if longest % group.len() != 0 {
                    warn!(
                        "group of {} paths does not divide the longest group ({longest}); \
                         extra paths will be omitted",
                        group.len()
                    );
                }
                stretch(group, longest, policy)
            })
            .collect(),
    };

    let common = groups.iter().map(Vec::len).min().unwrap_or(0);
    groups
        .into_iter()
        .map(|mut g| {
            g.truncate(common);
            g
        })
        .collect()
}

fn stretch(group: Vec<String>, longest: usize, policy: RepeatPolicy) -> Vec<String> {
    let times = longest / group.len();
    match policy {
        RepeatPolicy::Alt => {
            let mut out = Vec::with_capacity(group.len() * times);
            for _ in 0..times {
                out.extend(group.iter().cloned());
            }
            out
        }
        RepeatPolicy::Block => group
            .into_iter()
            .flat_map(|p| std::iter::repeat(p).take(times))
            .collect(),
    }
}

/// Zip groups position-wise into one input set per call.
pub fn aligned(groups: &[Vec<String>]) -> Vec<Vec<String>> {
    let len = groups.iter().map(Vec::len).min().unwrap_or(0);
    (0..len)
        .map(|i| groups.iter().map(|g| g[i].clone()).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load the first dataset of every aligned input set and stack them into one
/// array of shape `[n, ..]`, where `..` is the shape every dataset shares.
///
/// Nothing matched gives an empty array of shape `[0]`.
pub fn read_datasets(store_path: &Path, criteria: &Criteria) -> Result<Array> {
    let store = Store::open(store_path)?;
    let sets = aligned(&resolve(&store, criteria, None)?);
    let mut inner: Option<Vec<usize>> = None;
    let mut data = Vec::new();
    for set in &sets {
        let array = store.read_array(&set[0])?;
        let shape = inner.get_or_insert_with(|| array.shape().to_vec());
        if array.shape() != shape.as_slice() {
            return Err(Error::Shape {
                shape: shape.clone(),
                expected: shape.iter().product(),
                actual: array.len(),
            });
        }
        data.extend_from_slice(array.data());
    }

    let mut shape = vec![sets.len()];
    shape.extend(inner.unwrap_or_default());
    Array::new(shape, data)
}
