use std::sync::Arc;

use approx::assert_abs_diff_eq;
use hdfmap_core::{Attributes, Data, DataSource, Error, MemoryFile, Selection, Value};
use hdfmap_eval::{Evaluator, MapEval, MapReaders};
use hdfmap_namespace::{HdfMap, LocalPriority};
use ndarray::{ArrayD, IxDyn};

const IMAGE: &str = "/entry/instrument/pil3_100k/data";

fn nexus_file() -> MemoryFile {
    nexus_file_with_sum(vec![10.0, 20.0, 30.0, 20.0, 10.0])
}

fn nexus_file_with_sum(sum: Vec<f64>) -> MemoryFile {
    let image = ArrayD::from_shape_fn(IxDyn(&[5, 4, 6]), |idx| {
        (idx[0] * 100 + idx[1] * 10 + idx[2]) as f64
    });
    MemoryFile::new("/data/12345.nxs")
        .with_group("/", Attributes::new().with("default", "entry"))
        .with_group(
            "/entry",
            Attributes::new()
                .with("NX_class", "NXentry")
                .with("default", "measurement"),
        )
        .with_group(
            "/entry/measurement",
            Attributes::new()
                .with("NX_class", "NXdata")
                .with("signal", "sum")
                .with("axes", "eta"),
        )
        .with_dataset(
            "/entry/measurement/eta",
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            Attributes::new().with("units", "deg"),
        )
        .with_dataset("/entry/measurement/sum", sum, Attributes::new())
        .with_group(
            "/entry/instrument/pil3_100k",
            Attributes::new().with("NX_class", "NXdetector"),
        )
        .with_dataset(IMAGE, image, Attributes::new())
        .with_group(
            "/entry/instrument/mono",
            Attributes::new().with("NX_class", "NXmonochromator"),
        )
        .with_dataset(
            "/entry/instrument/mono/energy",
            Data::scalar(8.0),
            Attributes::new().with("units", "keV"),
        )
}

fn setup() -> (Arc<MemoryFile>, HdfMap) {
    let file = Arc::new(nexus_file());
    let map = HdfMap::from_source(file.as_ref()).unwrap();
    (file, map)
}

fn source(file: &Arc<MemoryFile>) -> Arc<dyn DataSource> {
    Arc::clone(file) as Arc<dyn DataSource>
}

fn floats(value: &Value) -> Vec<f64> {
    value.to_array().unwrap().iter().copied().collect()
}

fn scalar(value: &Value) -> f64 {
    value.as_f64().unwrap()
}

#[test]
fn test_plain_names_and_arithmetic() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(floats(&evaluator.eval("sum").unwrap()), vec![10.0, 20.0, 30.0, 20.0, 10.0]);
    let normalised = evaluator.eval("sum / max(sum)").unwrap();
    assert_abs_diff_eq!(floats(&normalised)[2], 1.0);
    assert_abs_diff_eq!(scalar(&evaluator.eval("energy * 2").unwrap()), 16.0);
    assert_abs_diff_eq!(scalar(&evaluator.eval("mean(eta)").unwrap()), 3.0);
}

#[test]
fn test_reads_follow_used_names() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    file.reset_reads();
    evaluator.eval("sum").unwrap();
    assert_eq!(file.read_count(), 1);

    file.reset_reads();
    evaluator.eval("sum + eta").unwrap();
    assert_eq!(file.read_count(), 2);

    file.reset_reads();
    evaluator.eval("sum + sum * 2").unwrap();
    assert_eq!(file.read_count(), 1);
}

#[test]
fn test_short_circuit_skips_reads() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    file.reset_reads();
    assert_eq!(evaluator.eval("True or sum").unwrap(), Value::Bool(true));
    assert_eq!(file.read_count(), 0);

    evaluator.eval("sum if False else eta").unwrap();
    assert_eq!(file.read_paths(), vec!["/entry/measurement/eta".to_string()]);
}

#[test]
fn test_fallback_and_default() {
    let (file, mut map) = setup();
    map.add_local("fallback_name", 7_i64);
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(evaluator.eval("(missing_name|fallback_name)").unwrap(), Value::Int(7));
    assert_abs_diff_eq!(scalar(&evaluator.eval("(missing_name|energy)").unwrap()), 8.0);
    assert_eq!(evaluator.eval("unknown_name?(0)").unwrap(), Value::Int(0));
    assert_abs_diff_eq!(scalar(&evaluator.eval("(a_name|b_name)?(2.5) * 2").unwrap()), 5.0);

    let err = evaluator.eval("(a_name|b_name)").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_fallback_after_rebind_to_sparser_file() {
    let (file, mut map) = setup();
    map.add_local("backup_energy", 9.5);
    let sparse = Arc::new(
        MemoryFile::new("/data/12346.nxs")
            .with_dataset("/entry/measurement/eta", vec![1.0, 2.0], Attributes::new()),
    );
    let mut evaluator = Evaluator::new(&map, source(&file));
    assert_abs_diff_eq!(scalar(&evaluator.eval("(energy|backup_energy)").unwrap()), 8.0);

    evaluator.rebind(Arc::clone(&sparse) as Arc<dyn DataSource>);
    assert_abs_diff_eq!(scalar(&evaluator.eval("(energy|backup_energy)").unwrap()), 9.5);
    assert_abs_diff_eq!(scalar(&evaluator.eval("energy?(1.5)").unwrap()), 1.5);
    assert!(evaluator.eval("energy").unwrap_err().is_not_found());
}

#[test]
fn test_string_repeat_is_bounded() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(evaluator.eval("'ab' * 3").unwrap(), Value::Str("ababab".into()));
    let err = evaluator.eval("'ab' * 10**15").unwrap_err();
    assert!(matches!(err, Error::Evaluation(_)), "{err:?}");
}

#[test]
fn test_unknown_name_keeps_symbol_in_message() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    let err = evaluator.eval("nothing_here + 1").unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("nothing_here"), "{err}");
    assert!(!err.to_string().contains("__sym"), "{err}");
}

#[test]
fn test_prefixed_references() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(
        evaluator.eval("_eta").unwrap(),
        Value::Str("/entry/measurement/eta".into())
    );
    assert_eq!(evaluator.eval("__axes").unwrap(), Value::Str("eta".into()));
    assert_eq!(evaluator.eval("s_energy").unwrap(), Value::Str("8.0 keV".into()));
    assert_eq!(evaluator.eval("eta@units").unwrap(), Value::Str("deg".into()));
}

#[test]
fn test_raw_handle_reads_only_selection() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    file.reset_reads();
    let handle = evaluator.eval("d_sum").unwrap();
    assert!(matches!(handle, Value::Dataset(_)));
    assert_eq!(file.read_count(), 0);

    assert_abs_diff_eq!(scalar(&evaluator.eval("d_sum[2]").unwrap()), 30.0);
    assert_eq!(file.read_count(), 1);
    assert_eq!(evaluator.eval("d_sum.shape").unwrap().to_string(), "(5)");
}

#[test]
fn test_reserved_and_direct_paths() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(evaluator.eval("filename").unwrap(), Value::Str("12345.nxs".into()));
    assert_eq!(
        evaluator.eval("filepath").unwrap(),
        Value::Str("/data/12345.nxs".into())
    );
    assert_abs_diff_eq!(
        scalar(&evaluator.eval("/entry/instrument/mono/energy").unwrap()),
        8.0
    );
}

#[test]
fn test_tuple_result() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    let value = evaluator.eval("eta[0], sum[0]").unwrap();
    assert_eq!(value.to_string(), "(1.0, 10.0)");
}

#[test]
fn test_syntax_errors() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    for bad in ["sum +", "(a_name|b_name", "sum?(", "eta@", ""] {
        let err = evaluator.eval(bad).unwrap_err();
        assert!(matches!(err, Error::ExpressionSyntax { .. }), "{bad:?} gave {err:?}");
    }
}

#[test]
fn test_format_templates() {
    let (file, map) = setup();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_eq!(evaluator.format("{energy:.2f} keV").unwrap(), "8.00 keV");
    assert_eq!(
        evaluator.format("eta {eta[0]:.1f}-{eta[-1]:.1f} {eta@units}").unwrap(),
        "eta 1.0-5.0 deg"
    );
    assert_eq!(evaluator.format("{{literal}} {filename}").unwrap(), "{literal} 12345.nxs");
    assert_eq!(evaluator.format("{3.14159:.2f}").unwrap(), "3.14");
    assert!(evaluator.format("{energy").is_err());
}

#[test]
fn test_cache_reuses_reads() {
    let (file, map) = setup();
    let mut evaluator = Evaluator::new(&map, source(&file)).with_cache();
    file.reset_reads();
    evaluator.eval("sum").unwrap();
    evaluator.eval("sum * 2").unwrap();
    assert_eq!(file.read_count(), 1);

    evaluator.disable_cache();
    evaluator.eval("sum").unwrap();
    evaluator.eval("sum").unwrap();
    assert_eq!(file.read_count(), 3);
}

#[test]
fn test_rebind_drops_cache() {
    let (file, map) = setup();
    let other = Arc::new(nexus_file_with_sum(vec![1.0; 5]));
    let mut evaluator = Evaluator::new(&map, source(&file)).with_cache();
    assert_abs_diff_eq!(scalar(&evaluator.eval("sum[0]").unwrap()), 10.0);
    evaluator.rebind(source(&other));
    assert_abs_diff_eq!(scalar(&evaluator.eval("sum[0]").unwrap()), 1.0);
}

#[test]
fn test_local_priority() {
    let (file, mut map) = setup();
    map.add_local("eta", 99.0);
    map.add_local("scale", 2.0);
    assert_abs_diff_eq!(scalar(&map.eval(source(&file), "eta").unwrap()), 99.0);

    map.set_local_priority(LocalPriority::PreferFile);
    assert_eq!(floats(&map.eval(source(&file), "eta").unwrap()).len(), 5);
    assert_abs_diff_eq!(scalar(&map.eval(source(&file), "scale * 3").unwrap()), 6.0);
}

#[test]
fn test_named_expressions() {
    let (file, mut map) = setup();
    map.add_named_expression("norm", "sum / max(sum)");
    map.add_named_expression("peak", "norm[2] * energy");
    assert_abs_diff_eq!(scalar(&map.eval(source(&file), "peak").unwrap()), 8.0);
    assert_eq!(map.format(source(&file), "{peak:.1f}").unwrap(), "8.0");

    map.add_named_expression("loop_a", "loop_b + 1");
    map.add_named_expression("loop_b", "loop_a + 1");
    let err = map.eval(source(&file), "loop_a").unwrap_err();
    assert!(matches!(err, Error::Evaluation(_)), "{err:?}");
}

#[test]
fn test_roi_reductions() {
    let (file, mut map) = setup();
    map.add_roi("box", "2", "3", 2, 2, None).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));

    file.reset_reads();
    let totals = floats(&evaluator.eval("box_total").unwrap());
    assert_eq!(totals, vec![70.0, 470.0, 870.0, 1270.0, 1670.0]);
    assert_eq!(file.read_count(), 1);

    assert_abs_diff_eq!(scalar(&evaluator.eval("box_max[0]").unwrap()), 23.0);
    assert_abs_diff_eq!(scalar(&evaluator.eval("box_min[0]").unwrap()), 12.0);
    assert_abs_diff_eq!(scalar(&evaluator.eval("box_mean[1]").unwrap()), 117.5);
    assert_eq!(evaluator.eval("box").unwrap().to_array().unwrap().shape(), &[5, 2, 2]);

    // A linear image has a background equal to the region itself.
    assert_abs_diff_eq!(scalar(&evaluator.eval("box_bkg[0]").unwrap()), 70.0, epsilon = 1e-9);
    assert_abs_diff_eq!(scalar(&evaluator.eval("box_rmbkg[0]").unwrap()), 0.0, epsilon = 1e-9);
    assert_eq!(
        evaluator.eval("box_box").unwrap().to_string(),
        "[[2.0, 1.0], [4.0, 1.0], [4.0, 3.0], [2.0, 3.0], [2.0, 1.0]]"
    );
}

#[test]
fn test_roi_clipped_at_image_edge() {
    let (file, mut map) = setup();
    map.add_roi("corner", "0", "0", 4, 4, Some(IMAGE)).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));
    assert_abs_diff_eq!(scalar(&evaluator.eval("corner_total[0]").unwrap()), 22.0);

    map.add_roi("away", "100", "100", 4, 4, None).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));
    let err = evaluator.eval("away_total").unwrap_err();
    assert!(matches!(err, Error::InvalidRoi(_)), "{err:?}");
}

#[test]
fn test_roi_centre_from_metadata() {
    let (file, mut map) = setup();
    map.add_roi("tracked", "energy / 4", "energy - 5", 2, 2, None).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));
    let totals = floats(&evaluator.eval("tracked_total").unwrap());
    assert_eq!(totals, vec![70.0, 470.0, 870.0, 1270.0, 1670.0]);

    map.add_roi("label", "eta@units", "0", 2, 2, None).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));
    let err = evaluator.eval("label_total").unwrap_err();
    assert!(matches!(err, Error::InvalidRoi(_)), "{err:?}");
}

#[test]
fn test_roi_background_clipped_at_image_edge() {
    let (file, mut map) = setup();
    map.add_roi("edge", "0", "0", 2, 2, None).unwrap();
    let evaluator = Evaluator::new(&map, source(&file));
    // The region keeps one pixel and the background ring three.
    assert_eq!(
        evaluator.eval("edge_bkg_box").unwrap().to_string(),
        "[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]"
    );
    let bkg = floats(&evaluator.eval("edge_bkg").unwrap());
    assert_abs_diff_eq!(bkg[0], 22.0 / 3.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bkg[1], 322.0 / 3.0, epsilon = 1e-9);
    for value in floats(&evaluator.eval("edge_rmbkg").unwrap()) {
        assert_abs_diff_eq!(value, -22.0 / 3.0, epsilon = 1e-9);
    }
}

#[test]
fn test_readers() {
    let (file, map) = setup();
    let source = file.as_ref();
    let value = map
        .get_data(source, "eta", &Selection::index(-1), None)
        .unwrap();
    assert_abs_diff_eq!(scalar(&value), 5.0);
    let fallback = map
        .get_data(source, "absent", &Selection::all(), Some(Value::Int(-1)))
        .unwrap();
    assert_eq!(fallback, Value::Int(-1));
    assert!(map.get_data(source, "absent", &Selection::all(), None).is_err());

    assert_eq!(map.get_string(source, "energy", true).unwrap(), "8.0 keV");
    assert_eq!(map.get_string(source, "energy", false).unwrap(), "8.0");
    assert_eq!(
        map.get_attr_value(source, "eta", "units").unwrap(),
        Value::Str("deg".into())
    );

    let middle = map.get_image(source, None).unwrap().to_array().unwrap();
    assert_eq!(middle.shape(), &[4, 6]);
    assert_abs_diff_eq!(middle[[0, 0]], 200.0);
    let first = map.get_image(source, Some(0)).unwrap().to_array().unwrap();
    assert_abs_diff_eq!(first[[1, 1]], 11.0);

    let metadata = map.get_metadata(source);
    assert_eq!(metadata.get("energy"), Some(&Value::Float(8.0)));
    let scannables = map.get_scannables(source).unwrap();
    assert!(scannables.contains_key("eta") && scannables.contains_key("sum"));
}
