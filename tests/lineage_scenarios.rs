//! End-to-end scenarios against a real store file: apply, sweep, versioning,
//! attribute propagation, and maintenance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lineage::process::writer::{ATTR_NAME, ATTR_OPERATION_NUMBER, ATTR_SHAPE, ATTR_SOURCE};
use lineage::process::{
    self, apply, last_process, list_processes, remove_process, repack, ApplyRequest, Criteria,
    Func, Output, RepeatPolicy,
};
use lineage::{Array, AttrValue, Attrs, Decline, Error, Store};
use tempfile::tempdir;

fn store_with(dir: &Path, datasets: &[(&str, &[f64])]) -> PathBuf {
    let path = dir.join("scan.lineage");
    let mut store = Store::create(&path).unwrap();
    for (name, values) in datasets {
        store.write_dataset(name, Array::from_vec(values.to_vec())).unwrap();
    }
    store.close().unwrap();
    path
}

/// Every dataset in the store with its payload and attributes.
fn snapshot(path: &Path) -> BTreeMap<String, (Array, Attrs)> {
    let store = Store::open(path).unwrap();
    store
        .dataset_paths("")
        .unwrap()
        .into_iter()
        .map(|p| {
            let dataset = store.dataset(&p).unwrap();
            (p, (dataset.array.clone(), dataset.attrs.clone()))
        })
        .collect()
}

fn subtract() -> Func {
    Func::new("subtract", |inputs, _| {
        let (a, b) = (&inputs[0], &inputs[1]);
        let data = a.data().iter().zip(b.data()).map(|(x, y)| x - y).collect();
        Ok(Some(vec![Output::Plain(Array::from_vec(data))]))
    })
}

#[test]
fn add_one_writes_versioned_output_with_provenance() {
    let dir = tempdir().unwrap();
    let path = store_with(dir.path(), &[("datasets/sample/values", &[1.0, 2.0, 3.0])]);
    let add_one = Func::elementwise("add_one", |v| v + 1.0);

    apply(&path, &add_one, &ApplyRequest::new(["datasets/sample/values"]), &Decline)
        .unwrap()
        .unwrap();

    let store = Store::open(&path).unwrap();
    let out = "process/001-add_one/sample/values";
    assert_eq!(store.read_array(out).unwrap().data(), &[2.0, 3.0, 4.0]);
    assert_eq!(store.read_array("datasets/sample/values").unwrap().data(), &[1.0, 2.0, 3.0]);
    let attrs = store.attrs(out).unwrap();
    assert_eq!(attrs[ATTR_OPERATION_NUMBER], AttrValue::from("001"));
    assert_eq!(attrs[ATTR_SOURCE], AttrValue::StrList(vec!["datasets/sample/values".into()]));
}

#[test]
fn returning_nothing_leaves_process_group_unchanged() {
    let dir = tempdir().unwrap();
    let path = store_with(dir.path(), &[("datasets/sample/values", &[1.0])]);
    let before = std::fs::read(&path).unwrap();
    let skip = Func::new("skip", |_, _| Ok(None));

    let request = ApplyRequest::new(["datasets/sample/values"]);
    let result = apply(&path, &skip, &request, &Decline).unwrap();
    assert!(result.is_none());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn plain_and_annotated_outputs_both_carry_provenance() {
    let dir = tempdir().unwrap();
    let path = store_with(dir.path(), &[("datasets/scan/height", &[1.0, 4.0, 9.0])]);
    let split = Func::new("split", |inputs, _| {
        let height = &inputs[0];
        Ok(Some(vec![
            Output::Plain(height.map(f64::sqrt)),
            Output::annotated(height.map(|v| v / 2.0)).with_attr("unit", "2 nm"),
        ]))
    });
    let request = ApplyRequest::new(["datasets/scan/height"]).outputs(["root", "halved"]);

    let applied = apply(&path, &split, &request, &Decline).unwrap().unwrap();
    assert_eq!(
        applied.written,
        vec!["process/001-split/scan/root", "process/001-split/scan/halved"]
    );

    let store = Store::open(&path).unwrap();
    let root = "process/001-split/scan/root";
    let halved = "process/001-split/scan/halved";
    assert_eq!(store.read_array(root).unwrap().data(), &[1.0, 2.0, 3.0]);
    assert_eq!(store.read_array(halved).unwrap().data(), &[0.5, 2.0, 4.5]);
    assert!(!store.attrs(root).unwrap().contains_key("unit"));
    assert_eq!(store.attrs(halved).unwrap()["unit"], AttrValue::from("2 nm"));

    for (out, name) in [(root, "root"), (halved, "halved")] {
        let attrs = store.attrs(out).unwrap();
        assert_eq!(attrs[ATTR_OPERATION_NUMBER], AttrValue::from("001"));
        assert_eq!(attrs[ATTR_NAME], AttrValue::from(name));
        assert_eq!(attrs[ATTR_SHAPE], AttrValue::IntList(vec![3]));
        assert_eq!(
            attrs[ATTR_SOURCE],
            AttrValue::StrList(vec!["datasets/scan/height".into()])
        );
    }
}

#[test]
fn output_arity_mismatch_creates_no_folder() {
    let dir = tempdir().unwrap();
    let path = store_with(dir.path(), &[("datasets/sample/values", &[1.0])]);
    let single = Func::elementwise("single", |v| v);
    let request = ApplyRequest::new(["datasets/sample/values"]).outputs(["a", "b"]);

    let err = apply(&path, &single, &request, &Decline).unwrap_err();
    assert!(matches!(err, Error::OutputArity { expected: 2, actual: 1, .. }));
    assert!(Store::open(&path).unwrap().children("process").unwrap().is_empty());
}

#[test]
fn increment_controls_folder_numbering() {
    let dir = tempdir().unwrap();
    let path = store_with(
        dir.path(),
        &[("datasets/s1/x", &[1.0]), ("datasets/s2/x", &[2.0])],
    );
    let double = Func::elementwise("double", |v| v * 2.0);

    let first = apply(&path, &double, &ApplyRequest::new(["datasets/s1/x"]), &Decline)
        .unwrap()
        .unwrap();
    let second = apply(&path, &double, &ApplyRequest::new(["datasets/s1/x"]), &Decline)
        .unwrap()
        .unwrap();
    assert_eq!(first.operation.to_string(), "001-double");
    assert_eq!(second.operation.to_string(), "002-double");

    let reused = apply(
        &path,
        &double,
        &ApplyRequest::new(["datasets/s2/x"]).increment(false),
        &Decline,
    )
    .unwrap()
    .unwrap();
    assert_eq!(reused.operation.to_string(), "002-double");
    assert_eq!(reused.written, vec!["process/002-double/s2/x"]);
    assert_eq!(last_process(&path, "").unwrap().as_deref(), Some("002-double"));
}

#[test]
fn propagated_attribute_comes_from_the_input_that_has_it() {
    let dir = tempdir().unwrap();
    let path = store_with(
        dir.path(),
        &[("datasets/a/x", &[5.0, 6.0]), ("datasets/b/x", &[1.0, 1.0])],
    );
    {
        let mut store = Store::open_rw(&path).unwrap();
        store.set_attr("datasets/a/x", "scale", AttrValue::Int(2)).unwrap();
        store.close().unwrap();
    }

    let request = ApplyRequest::new(["datasets/b/x", "datasets/a/x"]).propagate_attrs(&["scale"]);
    apply(&path, &subtract(), &request, &Decline).unwrap().unwrap();

    let store = Store::open(&path).unwrap();
    let attrs = store.attrs("process/001-subtract/b/x").unwrap();
    assert_eq!(attrs["scale"], AttrValue::Int(2));
}

#[test]
fn sweep_pairs_groups_by_repeat_policy() {
    let dir = tempdir().unwrap();
    let path = store_with(
        dir.path(),
        &[
            ("datasets/a/x", &[10.0]),
            ("datasets/b/x", &[20.0]),
            ("datasets/c/x", &[30.0]),
            ("datasets/d/x", &[40.0]),
            ("datasets/ref1/r", &[1.0]),
            ("datasets/ref2/r", &[2.0]),
        ],
    );
    let criteria = Criteria::from(vec![vec!["datasets/*/x"], vec!["datasets/*/r"]]);

    let mut reports = Vec::new();
    let summary = process::run(
        &path,
        &subtract(),
        &criteria,
        Some(RepeatPolicy::Block),
        &ApplyRequest::default(),
        &Decline,
        &mut |p| reports.push((p.completed, p.total)),
    )
    .unwrap();
    assert_eq!(summary.calls, 4);
    assert_eq!(summary.operation.unwrap().to_string(), "001-subtract");
    assert_eq!(reports, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);

    let store = Store::open(&path).unwrap();
    let block: Vec<f64> = ["a", "b", "c", "d"]
        .iter()
        .map(|g| store.read_array(&format!("process/001-subtract/{g}/x")).unwrap().data()[0])
        .collect();
    assert_eq!(block, vec![9.0, 19.0, 28.0, 38.0]);
    drop(store);

    let summary = process::run(
        &path,
        &subtract(),
        &criteria,
        Some(RepeatPolicy::Alt),
        &ApplyRequest::default(),
        &Decline,
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(summary.operation.unwrap().to_string(), "002-subtract");

    let store = Store::open(&path).unwrap();
    let alt: Vec<f64> = ["a", "b", "c", "d"]
        .iter()
        .map(|g| store.read_array(&format!("process/002-subtract/{g}/x")).unwrap().data()[0])
        .collect();
    assert_eq!(alt, vec![9.0, 18.0, 29.0, 38.0]);
}

#[test]
fn sweep_without_policy_truncates_to_shortest_group() {
    let dir = tempdir().unwrap();
    let path = store_with(
        dir.path(),
        &[
            ("datasets/a/x", &[10.0]),
            ("datasets/b/x", &[20.0]),
            ("datasets/c/x", &[30.0]),
            ("datasets/ref1/r", &[1.0]),
        ],
    );
    let criteria = Criteria::from(vec![vec!["datasets/*/x"], vec!["datasets/*/r"]]);
    let summary = process::run(
        &path,
        &subtract(),
        &criteria,
        None,
        &ApplyRequest::default(),
        &Decline,
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(summary.calls, 1);
    let store = Store::open(&path).unwrap();
    assert_eq!(store.children("process/001-subtract").unwrap(), vec!["a"]);
}

#[test]
fn remove_then_repack_reclaims_space_and_keeps_data() {
    let dir = tempdir().unwrap();
    let big: Vec<f64> = (0..4096).map(f64::from).collect();
    let path = store_with(dir.path(), &[("datasets/sample/values", big.as_slice())]);
    let negate = Func::elementwise("negate", |v| -v);
    let scale = Func::elementwise("scale", |v| v * 3.0);
    for f in [&negate, &scale] {
        apply(&path, f, &ApplyRequest::new(["datasets/sample/values"]), &Decline)
            .unwrap()
            .unwrap();
    }
    assert_eq!(list_processes(&path, "").unwrap(), vec!["negate", "scale"]);
    {
        let mut store = Store::open_rw(&path).unwrap();
        store.set_attr("datasets/sample", "tip", AttrValue::from("PtIr")).unwrap();
        store.close().unwrap();
    }

    assert!(remove_process(&path, "001-negate").unwrap());
    let before = snapshot(&path);
    assert!(before.keys().all(|p| !p.starts_with("process/001-negate")));
    assert_eq!(before.len(), 2);

    let report = repack(&path, true, &Decline).unwrap().unwrap();
    assert!(report.bytes_after < report.bytes_before);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), report.bytes_after);

    assert_eq!(snapshot(&path), before);
    let store = Store::open(&path).unwrap();
    assert_eq!(store.attrs("datasets/sample").unwrap()["tip"], AttrValue::from("PtIr"));
    assert!(!store.contains("process/001-negate"));
    assert_eq!(store.children("process").unwrap(), vec!["002-scale"]);
}

#[test]
fn store_round_trips_through_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rt.lineage");
    {
        let mut store = Store::create(&path).unwrap();
        let array = Array::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        store.write_dataset("datasets/grid/z", array).unwrap();
        store.set_attr("datasets/grid/z", "unit", AttrValue::from("nm")).unwrap();
        store.set_attr("datasets/grid", "tip", AttrValue::from("PtIr")).unwrap();
        store.close().unwrap();
    }

    let store = Store::open(&path).unwrap();
    let z = store.read_array("datasets/grid/z").unwrap();
    assert_eq!(z.shape(), &[2, 3]);
    assert_eq!(z.data()[5], 6.0);
    assert_eq!(store.attrs("datasets/grid/z").unwrap()["unit"], AttrValue::from("nm"));
    assert_eq!(store.attrs("datasets/grid").unwrap()["tip"], AttrValue::from("PtIr"));
}

#[test]
fn second_writer_is_refused_while_store_is_open() {
    let dir = tempdir().unwrap();
    let path = store_with(dir.path(), &[("datasets/a/x", &[1.0])]);
    let _writer = Store::open_rw(&path).unwrap();
    assert!(matches!(Store::open_rw(&path), Err(Error::Locked(_))));
}
