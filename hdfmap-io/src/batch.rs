//! Applying one map across many files.
//!
//! The map is built once from a representative file and reused for every
//! other file, which is assumed to share its layout. Files are opened one at
//! a time through an opener and closed again before the next one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use hdfmap_core::{DataSource, Selection, Value};
use hdfmap_eval::{Evaluator, MapReaders};
use hdfmap_namespace::{HdfMap, MapConfig};

use crate::{Error, Result};

/// Container file extensions; the first is the usual one for [`list_files`].
pub const EXTENSIONS: [&str; 4] = [".nxs", ".hdf", ".hdf5", ".h5"];

/// Opens a container from its identifier.
pub type Opener<'a> = &'a dyn Fn(&str) -> Result<Arc<dyn DataSource>>;

/// Builds a map from `path`.
///
/// # Errors
/// Returns an error if the file cannot be opened or its root cannot be scanned.
pub fn create_map(path: &str, config: &MapConfig, open: Opener<'_>) -> Result<HdfMap> {
    let source = open(path)?;
    let map = HdfMap::build(source.as_ref(), config).map_err(|e| Error::in_file(path, e))?;
    log::info!("map of {path}: {} names", map.combined().len());
    Ok(map)
}

/// Evaluates `expression` in every file.
///
/// # Errors
/// Returns the first failure, tagged with its file.
pub fn multi_eval<S: AsRef<str>>(
    files: &[S],
    expression: &str,
    map: &HdfMap,
    open: Opener<'_>,
) -> Result<Vec<Value>> {
    per_file(files, open, |path, source| {
        Evaluator::new(map, source)
            .eval(expression)
            .map_err(|e| Error::in_file(path, e))
    })
}

/// Fills `template` from every file.
///
/// # Errors
/// Returns the first failure, tagged with its file.
pub fn multi_format<S: AsRef<str>>(
    files: &[S],
    template: &str,
    map: &HdfMap,
    open: Opener<'_>,
) -> Result<Vec<String>> {
    per_file(files, open, |path, source| {
        Evaluator::new(map, source)
            .format(template)
            .map_err(|e| Error::in_file(path, e))
    })
}

/// Reads every name in `names` from every file; one row per file.
///
/// # Errors
/// Returns the first failure, tagged with its file.
pub fn multi_get_data<S: AsRef<str>>(
    files: &[S],
    names: &[&str],
    map: &HdfMap,
    open: Opener<'_>,
) -> Result<Vec<Vec<Value>>> {
    per_file(files, open, |path, source| {
        names
            .iter()
            .map(|name| {
                map.get_data(source.as_ref(), name, &Selection::all(), None)
                    .map_err(|e| Error::in_file(path, e))
            })
            .collect()
    })
}

/// Reads the default image of every file; `None` takes the middle frame.
///
/// # Errors
/// Returns the first failure, tagged with its file.
pub fn multi_get_image<S: AsRef<str>>(
    files: &[S],
    index: Option<isize>,
    map: &HdfMap,
    open: Opener<'_>,
) -> Result<Vec<Value>> {
    per_file(files, open, |path, source| {
        map.get_image(source.as_ref(), index)
            .map_err(|e| Error::in_file(path, e))
    })
}

/// Scannable arrays and scalar metadata of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBlock {
    pub filepath: String,
    pub scannables: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
}

impl DataBlock {
    /// Looks a name up in the scannables first, then in the metadata.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scannables.get(name).or_else(|| self.metadata.get(name))
    }
}

/// Collects a [`DataBlock`] from every file.
///
/// # Errors
/// Returns the first failure, tagged with its file.
pub fn multi_data_block<S: AsRef<str>>(
    files: &[S],
    map: &HdfMap,
    open: Opener<'_>,
) -> Result<Vec<DataBlock>> {
    per_file(files, open, |path, source| {
        let scannables = map
            .get_scannables(source.as_ref())
            .map_err(|e| Error::in_file(path, e))?;
        Ok(DataBlock {
            filepath: path.to_string(),
            scannables,
            metadata: map.get_metadata(source.as_ref()),
        })
    })
}

/// Files in `folder` whose name ends with `extension`, oldest first.
///
/// A folder that does not exist holds no files.
///
/// # Errors
/// Returns [`Error::Io`] if the folder or an entry cannot be read.
pub fn list_files(folder: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(folder.as_ref()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} does not exist", folder.as_ref().display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let matches = entry.file_name().to_string_lossy().ends_with(extension);
        if metadata.is_file() && matches {
            files.push((metadata.modified()?, entry.path()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn per_file<S, T, F>(files: &[S], open: Opener<'_>, mut apply: F) -> Result<Vec<T>>
where
    S: AsRef<str>,
    F: FnMut(&str, Arc<dyn DataSource>) -> Result<T>,
{
    let mut results = Vec::with_capacity(files.len());
    for (n, file) in files.iter().enumerate() {
        let path = file.as_ref();
        log::debug!("batch {}/{}: {path}", n + 1, files.len());
        results.push(apply(path, open(path)?)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfmap_core::{Attributes, Data, MemoryFile};

    fn scan_file(name: &str, energy: f64) -> Arc<dyn DataSource> {
        Arc::new(
            MemoryFile::new(name)
                .with_group(
                    "/entry/measurement",
                    Attributes::new()
                        .with("NX_class", "NXdata")
                        .with("signal", "sum")
                        .with("axes", "eta"),
                )
                .with_dataset("/entry/measurement/eta", vec![1.0, 2.0, 3.0], Attributes::new())
                .with_dataset(
                    "/entry/measurement/sum",
                    vec![energy, energy * 2.0, energy],
                    Attributes::new(),
                )
                .with_dataset(
                    "/entry/mono/energy",
                    Data::scalar(energy),
                    Attributes::new().with("units", "keV"),
                ),
        )
    }

    fn opener(path: &str) -> Result<Arc<dyn DataSource>> {
        match path {
            "a.nxs" => Ok(scan_file(path, 8.0)),
            "b.nxs" => Ok(scan_file(path, 9.5)),
            _ => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.to_string(),
            ))),
        }
    }

    #[test]
    fn test_multi_eval_and_format() {
        let map = create_map("a.nxs", &MapConfig::default(), &opener).unwrap();
        let files = ["a.nxs", "b.nxs"];
        let values = multi_eval(&files, "max(sum)", &map, &opener).unwrap();
        assert_eq!(values, vec![Value::Float(16.0), Value::Float(19.0)]);

        let lines = multi_format(&files, "{filename}: {energy:.1f} keV", &map, &opener).unwrap();
        assert_eq!(lines, vec!["a.nxs: 8.0 keV", "b.nxs: 9.5 keV"]);
    }

    #[test]
    fn test_multi_get_data_rows() {
        let map = create_map("a.nxs", &MapConfig::default(), &opener).unwrap();
        let rows = multi_get_data(&["a.nxs", "b.nxs"], &["energy", "eta"], &map, &opener).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Value::Float(9.5));
        assert_eq!(rows[0][1].to_string(), "[1.0, 2.0, 3.0]");
    }

    #[test]
    fn test_multi_get_image() {
        let image = |name: &str, offset: f64| -> Arc<dyn DataSource> {
            let frames = ndarray::ArrayD::from_shape_fn(ndarray::IxDyn(&[3, 2, 2]), |idx| {
                offset + (idx[0] * 10 + idx[1] * 2 + idx[2]) as f64
            });
            Arc::new(MemoryFile::new(name).with_dataset("/entry/det/data", frames, Attributes::new()))
        };
        let open = |path: &str| -> Result<Arc<dyn DataSource>> {
            Ok(image(path, if path == "b.nxs" { 100.0 } else { 0.0 }))
        };
        let map = create_map("a.nxs", &MapConfig::default(), &open).unwrap();
        let middle = multi_get_image(&["a.nxs", "b.nxs"], None, &map, &open).unwrap();
        assert_eq!(middle.len(), 2);
        assert_eq!(middle[0].to_string(), "[[10.0, 11.0], [12.0, 13.0]]");
        assert_eq!(middle[1].to_string(), "[[110.0, 111.0], [112.0, 113.0]]");

        let first = multi_get_image(&["b.nxs"], Some(0), &map, &open).unwrap();
        assert_eq!(first[0].to_string(), "[[100.0, 101.0], [102.0, 103.0]]");
    }

    #[test]
    fn test_multi_data_block() {
        let map = create_map("a.nxs", &MapConfig::default(), &opener).unwrap();
        let blocks = multi_data_block(&["a.nxs", "b.nxs"], &map, &opener).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].filepath, "b.nxs");
        assert_eq!(blocks[1].get("energy"), Some(&Value::Float(9.5)));
        assert_eq!(blocks[0].get("sum").unwrap().to_string(), "[8.0, 16.0, 8.0]");
        assert!(blocks[0].scannables.contains_key("eta"));
        assert!(blocks[0].get("missing").is_none());
    }

    #[test]
    fn test_list_files_by_extension_oldest_first() {
        use std::time::{Duration, UNIX_EPOCH};

        let dir = tempfile::tempdir().unwrap();
        let touch = |name: &str, secs: u64| {
            let path = dir.path().join(name);
            let file = std::fs::File::create(&path).unwrap();
            file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
        };
        touch("a.nxs", 300);
        touch("b.nxs", 100);
        touch("c.h5", 200);
        std::fs::create_dir(dir.path().join("d.nxs")).unwrap();

        let files = list_files(dir.path(), EXTENSIONS[0]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.nxs", "a.nxs"]);
        assert_eq!(list_files(dir.path(), ".h5").unwrap().len(), 1);
        assert!(list_files(dir.path().join("missing"), ".nxs").unwrap().is_empty());
    }

    #[test]
    fn test_batch_errors_name_the_file() {
        let map = create_map("a.nxs", &MapConfig::default(), &opener).unwrap();
        let err = multi_eval(&["a.nxs", "b.nxs"], "missing_name", &map, &opener).unwrap_err();
        assert!(err.to_string().starts_with("a.nxs"), "{err}");
        assert!(matches!(
            multi_eval(&["c.nxs"], "energy", &map, &opener),
            Err(Error::Io(_))
        ));
    }
}
