//! HDF5/NeXus container reader over `hdf5-metno`.
//!
//! Every group member is reported as a hard link: the library follows soft
//! and external links transparently, and loops are caught by the scanner's
//! depth limit.

use std::path::Path;
use std::sync::Arc;

use hdf5::types::{FixedAscii, FixedUnicode, H5Type, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Attribute, Container, Dataset, File, Location};
use hdfmap_core::{
    AttrValue, Attributes, AxisSelection, ChildLink, Data, DataSource, DtypeClass, NodeInfo,
    NodeKind, Selection,
};
use ndarray::{ArrayD, IxDyn, SliceInfo, SliceInfoElem};

use crate::Result;

use hdfmap_core::Error as CoreError;
type CoreResult<T> = hdfmap_core::Result<T>;

/// Longest fixed-length string read without truncation.
const MAX_FIXED_STRING: usize = 1024;

/// Open HDF5 file implementing [`DataSource`].
pub struct Hdf5Source {
    filepath: String,
    file: File,
}

impl Hdf5Source {
    /// Opens `path` read-only.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened as HDF5.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        log::debug!("opened {}", path.display());
        Ok(Self {
            filepath: path.to_string_lossy().into_owned(),
            file,
        })
    }

    fn check_exists(&self, path: &str) -> CoreResult<()> {
        if path == "/" || self.file.link_exists(path) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("'{path}' in {}", self.filepath)))
        }
    }
}

/// Opens `path` as a shared [`DataSource`].
///
/// # Errors
/// Returns an error if the file cannot be opened as HDF5.
pub fn open_source(path: &str) -> Result<Arc<dyn DataSource>> {
    Ok(Arc::new(Hdf5Source::open(path)?))
}

impl DataSource for Hdf5Source {
    fn filepath(&self) -> &str {
        &self.filepath
    }

    fn list(&self, path: &str) -> CoreResult<Vec<ChildLink>> {
        self.check_exists(path)?;
        let group = self.file.group(path).map_err(|e| source_error(path, &e))?;
        let names = group.member_names().map_err(|e| source_error(path, &e))?;
        Ok(names.into_iter().map(ChildLink::hard).collect())
    }

    fn info(&self, path: &str) -> CoreResult<NodeInfo> {
        self.check_exists(path)?;
        if let Ok(dataset) = self.file.dataset(path) {
            let dtype = match element_of(&dataset, path) {
                Ok(Element::VarUnicode | Element::FixedUnicode) => DtypeClass::String,
                Ok(Element::VarAscii | Element::FixedAscii) => DtypeClass::Bytes,
                _ => DtypeClass::Numeric,
            };
            return Ok(NodeInfo {
                kind: NodeKind::Dataset,
                attributes: read_attributes(&dataset),
                shape: dataset.shape(),
                dtype,
            });
        }
        let group = self.file.group(path).map_err(|e| source_error(path, &e))?;
        Ok(NodeInfo {
            kind: NodeKind::Group,
            attributes: read_attributes(&group),
            shape: Vec::new(),
            dtype: DtypeClass::default(),
        })
    }

    fn read(&self, path: &str, selection: &Selection) -> CoreResult<Data> {
        self.check_exists(path)?;
        let dataset = self.file.dataset(path).map_err(|e| source_error(path, &e))?;
        let axes = if selection.is_all() {
            None
        } else {
            Some(selection.resolve(&dataset.shape())?)
        };
        let axes = axes.as_deref();
        log::debug!("reading {path}{selection} from {}", self.filepath);
        Ok(match element_of(&dataset, path)? {
            Element::Integer => Data::Integer(read_array::<i64>(&dataset, path, axes)?),
            Element::Float => Data::Numeric(read_array::<f64>(&dataset, path, axes)?),
            Element::Boolean => {
                Data::Integer(read_array::<bool>(&dataset, path, axes)?.mapv(i64::from))
            }
            Element::VarUnicode => Data::Text(
                read_array::<VarLenUnicode>(&dataset, path, axes)?.map(|s| s.as_str().to_string()),
            ),
            Element::VarAscii => Data::Text(
                read_array::<VarLenAscii>(&dataset, path, axes)?.map(|s| s.as_str().to_string()),
            ),
            Element::FixedUnicode => Data::Text(
                read_array::<FixedUnicode<MAX_FIXED_STRING>>(&dataset, path, axes)?
                    .map(|s| s.as_str().to_string()),
            ),
            Element::FixedAscii => Data::Text(
                read_array::<FixedAscii<MAX_FIXED_STRING>>(&dataset, path, axes)?
                    .map(|s| s.as_str().to_string()),
            ),
        })
    }
}

/// Element types this reader converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Integer,
    Float,
    Boolean,
    VarUnicode,
    VarAscii,
    FixedUnicode,
    FixedAscii,
}

fn element_of(container: &Container, path: &str) -> CoreResult<Element> {
    let descriptor = container
        .dtype()
        .and_then(|dtype| dtype.to_descriptor())
        .map_err(|e| source_error(path, &e))?;
    Ok(match descriptor {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => Element::Integer,
        TypeDescriptor::Float(_) => Element::Float,
        TypeDescriptor::Boolean => Element::Boolean,
        TypeDescriptor::VarLenUnicode => Element::VarUnicode,
        TypeDescriptor::VarLenAscii => Element::VarAscii,
        TypeDescriptor::FixedUnicode(_) => Element::FixedUnicode,
        TypeDescriptor::FixedAscii(_) => Element::FixedAscii,
        other => {
            return Err(CoreError::Source(format!(
                "{path}: unsupported element type {other:?}"
            )))
        }
    })
}

/// Reads the whole dataset, or only the hyperslab described by `axes`.
fn read_array<T: H5Type>(
    dataset: &Dataset,
    path: &str,
    axes: Option<&[AxisSelection]>,
) -> CoreResult<ArrayD<T>> {
    let Some(axes) = axes else {
        return dataset.read_dyn::<T>().map_err(|e| source_error(path, &e));
    };
    if axes.iter().any(AxisSelection::is_empty) {
        let shape: Vec<usize> = axes
            .iter()
            .filter(|axis| matches!(axis, AxisSelection::Range { .. }))
            .map(AxisSelection::len)
            .collect();
        return ArrayD::from_shape_vec(IxDyn(&shape), Vec::new())
            .map_err(|e| CoreError::Evaluation(e.to_string()));
    }
    #[allow(clippy::cast_possible_wrap)]
    let elems: Vec<SliceInfoElem> = axes
        .iter()
        .map(|axis| match *axis {
            AxisSelection::Index(i) => SliceInfoElem::Index(i as isize),
            AxisSelection::Range { start, stop, step } => SliceInfoElem::Slice {
                start: start as isize,
                end: Some(stop as isize),
                step: step as isize,
            },
        })
        .collect();
    let slice = SliceInfo::<Vec<SliceInfoElem>, IxDyn, IxDyn>::try_from(elems)
        .map_err(|e| CoreError::Evaluation(format!("{path}: {e}")))?;
    dataset
        .read_slice::<T, _, IxDyn>(slice)
        .map_err(|e| source_error(path, &e))
}

fn read_attributes(location: &Location) -> Attributes {
    let mut attributes = Attributes::new();
    let names = match location.attr_names() {
        Ok(names) => names,
        Err(e) => {
            log::debug!("attributes of {} unreadable: {e}", location.name());
            return attributes;
        }
    };
    for name in names {
        let value = location
            .attr(&name)
            .map_err(|e| source_error(&name, &e))
            .and_then(|attr| read_attr(&attr, &name));
        match value {
            Ok(value) => attributes.insert(name, value),
            Err(e) => log::debug!("attribute {name} skipped: {e}"),
        }
    }
    attributes
}

fn read_attr(attr: &Attribute, name: &str) -> CoreResult<AttrValue> {
    let scalar = attr.shape().is_empty();
    let err = |e: hdf5::Error| source_error(name, &e);
    Ok(match element_of(attr, name)? {
        Element::Integer => ints(attr.read_raw::<i64>().map_err(err)?, scalar),
        Element::Boolean => {
            let values = attr.read_raw::<bool>().map_err(err)?;
            ints(values.into_iter().map(i64::from).collect(), scalar)
        }
        Element::Float => {
            let values = attr.read_raw::<f64>().map_err(err)?;
            match (scalar, values.as_slice()) {
                (true, [value]) => AttrValue::Float(*value),
                _ => AttrValue::FloatArray(values),
            }
        }
        Element::VarUnicode => strings(
            attr.read_raw::<VarLenUnicode>()
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string()),
            scalar,
        ),
        Element::VarAscii => strings(
            attr.read_raw::<VarLenAscii>()
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string()),
            scalar,
        ),
        Element::FixedUnicode => strings(
            attr.read_raw::<FixedUnicode<MAX_FIXED_STRING>>()
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string()),
            scalar,
        ),
        Element::FixedAscii => strings(
            attr.read_raw::<FixedAscii<MAX_FIXED_STRING>>()
                .map_err(err)?
                .iter()
                .map(|s| s.as_str().to_string()),
            scalar,
        ),
    })
}

fn ints(values: Vec<i64>, scalar: bool) -> AttrValue {
    match (scalar, values.as_slice()) {
        (true, [value]) => AttrValue::Int(*value),
        _ => AttrValue::IntArray(values),
    }
}

fn strings(values: impl Iterator<Item = String>, scalar: bool) -> AttrValue {
    let mut values: Vec<String> = values.collect();
    if scalar && values.len() == 1 {
        AttrValue::Str(values.remove(0))
    } else {
        AttrValue::StrArray(values)
    }
}

fn source_error(path: &str, error: &hdf5::Error) -> CoreError {
    CoreError::Source(format!("{path}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use hdfmap_core::Value;
    use hdfmap_eval::{MapEval, MapReaders};
    use hdfmap_namespace::HdfMap;
    use ndarray::{arr1, Array3};
    use std::str::FromStr;
    use tempfile::NamedTempFile;

    fn set_attr_str(location: &Location, name: &str, value: &str) -> hdf5::Result<()> {
        let value = VarLenUnicode::from_str(value).unwrap();
        location
            .new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&value)?;
        Ok(())
    }

    fn write_fixture(path: &Path) -> hdf5::Result<()> {
        let file = File::create(path)?;
        set_attr_str(&file, "default", "entry")?;
        let entry = file.create_group("entry")?;
        set_attr_str(&entry, "NX_class", "NXentry")?;
        set_attr_str(&entry, "default", "measurement")?;

        let title = VarLenUnicode::from_str("scan eta 1 5 1").unwrap();
        entry
            .new_dataset::<VarLenUnicode>()
            .shape(())
            .create("title")?
            .write_scalar(&title)?;

        let measurement = entry.create_group("measurement")?;
        set_attr_str(&measurement, "NX_class", "NXdata")?;
        set_attr_str(&measurement, "signal", "sum")?;
        set_attr_str(&measurement, "axes", "eta")?;
        let eta = measurement
            .new_dataset_builder()
            .with_data(&arr1(&[1.0_f64, 2.0, 3.0, 4.0, 5.0]))
            .create("eta")?;
        set_attr_str(&eta, "units", "deg")?;
        measurement
            .new_dataset_builder()
            .with_data(&arr1(&[10_i32, 20, 30, 20, 10]))
            .create("sum")?;

        let mono = entry.create_group("mono")?;
        set_attr_str(&mono, "NX_class", "NXmonochromator")?;
        let energy = mono.new_dataset::<f64>().shape(()).create("energy")?;
        energy.write_scalar(&8.0_f64)?;
        set_attr_str(&energy, "units", "keV")?;

        let detector = entry.create_group("pil3_100k")?;
        set_attr_str(&detector, "NX_class", "NXdetector")?;
        #[allow(clippy::cast_precision_loss)]
        let image = Array3::from_shape_fn((3, 4, 5), |(f, r, c)| (f * 100 + r * 10 + c) as f64);
        detector
            .new_dataset_builder()
            .with_data(&image)
            .create("data")?;
        Ok(())
    }

    fn fixture() -> (NamedTempFile, Hdf5Source) {
        let file = NamedTempFile::new().unwrap();
        write_fixture(file.path()).unwrap();
        let source = Hdf5Source::open(file.path()).unwrap();
        (file, source)
    }

    #[test]
    fn test_hdf5_list_and_info() {
        let (_file, source) = fixture();
        let root: Vec<String> = source.list("/").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(root, vec!["entry"]);
        assert_eq!(source.list("/entry").unwrap().len(), 4);

        let info = source.info("/entry/measurement/eta").unwrap();
        assert_eq!(info.kind, NodeKind::Dataset);
        assert_eq!(info.shape, vec![5]);
        assert_eq!(info.attributes.text("units").as_deref(), Some("deg"));

        let group = source.info("/entry/measurement").unwrap();
        assert_eq!(group.kind, NodeKind::Group);
        assert_eq!(group.attributes.text("signal").as_deref(), Some("sum"));
        assert_eq!(source.info("/entry/title").unwrap().dtype, DtypeClass::String);
    }

    #[test]
    fn test_hdf5_missing_path_is_not_found() {
        let (_file, source) = fixture();
        assert!(source.info("/entry/nothing").unwrap_err().is_not_found());
        assert!(source.info("/nope/deeper").unwrap_err().is_not_found());
        assert!(source
            .read("/entry/nothing", &Selection::all())
            .unwrap_err()
            .is_not_found());
        assert!(!source.contains("/entry/nothing"));
    }

    #[test]
    fn test_hdf5_read_selections() {
        let (_file, source) = fixture();
        let sum = source.read("/entry/measurement/sum", &Selection::all()).unwrap();
        assert_eq!(sum.shape(), &[5]);
        assert!(matches!(sum, Data::Integer(_)));

        let last = source
            .read("/entry/measurement/eta", &Selection::index(-1))
            .unwrap();
        assert_eq!(Value::from_data(last), Value::Float(5.0));

        let items = vec![
            hdfmap_core::SelectItem::Index(1),
            hdfmap_core::SelectItem::Slice(hdfmap_core::SliceSpec::range(1, 3)),
            hdfmap_core::SelectItem::Slice(hdfmap_core::SliceSpec {
                start: None,
                stop: None,
                step: Some(2),
            }),
        ];
        let window = source
            .read("/entry/pil3_100k/data", &Selection::from_items(items))
            .unwrap()
            .to_f64()
            .unwrap();
        assert_eq!(window.shape(), &[2, 3]);
        assert_abs_diff_eq!(window[[0, 0]], 110.0);
        assert_abs_diff_eq!(window[[1, 2]], 124.0);

        let title = source.read("/entry/title", &Selection::all()).unwrap();
        assert_eq!(Value::from_data(title), Value::Str("scan eta 1 5 1".into()));
    }

    #[test]
    fn test_hdf5_map_and_eval() {
        let (_file, source) = fixture();
        let map = HdfMap::from_source(&source).unwrap();
        assert_eq!(map.path_of("eta").unwrap(), "/entry/measurement/eta");
        assert_eq!(map.image_path(), Some("/entry/pil3_100k/data"));

        let source: Arc<dyn DataSource> = Arc::new(source);
        let peak = map.eval(Arc::clone(&source), "max(sum) / 10").unwrap();
        assert_abs_diff_eq!(peak.as_f64().unwrap(), 3.0);
        assert_eq!(
            map.format(Arc::clone(&source), "{energy:.1f} {eta@units}").unwrap(),
            "8.0 deg"
        );
        assert_eq!(
            map.get_string(source.as_ref(), "energy", true).unwrap(),
            "8.0 keV"
        );
    }
}
