//! A single file bound to its map, reopened for every call.

use std::sync::Arc;

use hdfmap_core::{DataSource, Selection, Value};
use hdfmap_eval::{Evaluator, MapReaders};
use hdfmap_namespace::{HdfMap, MapConfig};

use crate::{Error, Result};

/// Default axes and signal of a file, labelled for plotting.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotData {
    pub title: String,
    pub axes_labels: Vec<String>,
    pub axes: Vec<Value>,
    pub signal_label: String,
    pub signal: Value,
}

type BoxedOpener = Box<dyn Fn(&str) -> Result<Arc<dyn DataSource>> + Send + Sync>;

/// Filename plus the map built from it.
///
/// The file is not held open between calls.
pub struct FileLoader {
    filepath: String,
    map: HdfMap,
    opener: BoxedOpener,
}

impl FileLoader {
    /// Builds the map of `filepath` using `opener` to open it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or scanned.
    pub fn with_opener<F>(filepath: impl Into<String>, config: &MapConfig, opener: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Arc<dyn DataSource>> + Send + Sync + 'static,
    {
        let filepath = filepath.into();
        let map = crate::batch::create_map(&filepath, config, &opener)?;
        Ok(Self {
            filepath,
            map,
            opener: Box::new(opener),
        })
    }

    /// Opens an HDF5 file with the default configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or scanned.
    #[cfg(feature = "hdf5")]
    pub fn open(filepath: impl Into<String>) -> Result<Self> {
        Self::with_opener(filepath, &MapConfig::default(), crate::hdf5::open_source)
    }

    #[must_use]
    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    #[must_use]
    pub fn map(&self) -> &HdfMap {
        &self.map
    }

    /// Mutable map, for locals, named expressions and regions of interest.
    pub fn map_mut(&mut self) -> &mut HdfMap {
        &mut self.map
    }

    fn source(&self) -> Result<Arc<dyn DataSource>> {
        (self.opener)(&self.filepath)
    }

    fn wrap(&self, error: hdfmap_core::Error) -> Error {
        Error::in_file(&self.filepath, error)
    }

    /// # Errors
    /// See [`Evaluator::eval`].
    pub fn eval(&self, expression: &str) -> Result<Value> {
        Evaluator::new(&self.map, self.source()?)
            .eval(expression)
            .map_err(|e| self.wrap(e))
    }

    /// # Errors
    /// See [`Evaluator::format`].
    pub fn format(&self, template: &str) -> Result<String> {
        Evaluator::new(&self.map, self.source()?)
            .format(template)
            .map_err(|e| self.wrap(e))
    }

    /// # Errors
    /// See [`MapReaders::get_data`].
    pub fn get_data(&self, name: &str, selection: &Selection) -> Result<Value> {
        let source = self.source()?;
        self.map
            .get_data(source.as_ref(), name, selection, None)
            .map_err(|e| self.wrap(e))
    }

    /// # Errors
    /// See [`MapReaders::get_image`].
    pub fn get_image(&self, index: Option<isize>) -> Result<Value> {
        let source = self.source()?;
        self.map
            .get_image(source.as_ref(), index)
            .map_err(|e| self.wrap(e))
    }

    /// Reads the default axes and signal with labels taken from their
    /// names and `units` attributes.
    ///
    /// # Errors
    /// Returns [`hdfmap_core::Error::NotFound`] (tagged with the file) if the
    /// map has no default signal, and the read error if a dataset fails.
    pub fn plot_data(&self) -> Result<PlotData> {
        let signal_path = self.map.signal_path().ok_or_else(|| {
            self.wrap(hdfmap_core::Error::NotFound("no default signal".into()))
        })?;
        let source = self.source()?;
        let read = |path: &str| {
            self.map
                .get_data(source.as_ref(), path, &Selection::all(), None)
                .map_err(|e| self.wrap(e))
        };
        let mut axes = Vec::with_capacity(self.map.axes_paths().len());
        let mut axes_labels = Vec::with_capacity(axes.capacity());
        for path in self.map.axes_paths() {
            axes.push(read(path)?);
            axes_labels.push(self.label(path));
        }
        Ok(PlotData {
            title: source.filename().to_string(),
            axes_labels,
            axes,
            signal_label: self.label(signal_path),
            signal: read(signal_path)?,
        })
    }

    fn label(&self, path: &str) -> String {
        let name = self
            .map
            .name_of(path)
            .unwrap_or_else(|_| hdfmap_core::leaf_name(path).to_string());
        match self.map.attr_of(path, "units").ok().and_then(|a| a.as_text()) {
            Some(units) if !units.is_empty() => format!("{name} [{units}]"),
            _ => name,
        }
    }
}

impl std::fmt::Display for FileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileLoader({})\n{}", self.filepath, self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use hdfmap_core::{Attributes, Data, MemoryFile};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static OPENED: AtomicUsize = AtomicUsize::new(0);

    fn open_counted(path: &str) -> Result<Arc<dyn DataSource>> {
        OPENED.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(
            MemoryFile::new(path)
                .with_dataset("/entry/data/x", vec![1.0, 2.0, 4.0], Attributes::new())
                .with_dataset("/entry/data/y", vec![3.0, 5.0, 7.0], Attributes::new())
                .with_dataset("/entry/sample/temp", Data::scalar(295.0), Attributes::new()),
        ))
    }

    #[test]
    fn test_loader_reopens_per_call() {
        let mut loader =
            FileLoader::with_opener("run.nxs", &MapConfig::default(), open_counted).unwrap();
        let before = OPENED.load(Ordering::Relaxed);
        assert_eq!(loader.eval("sum(x * y)").unwrap(), Value::Float(41.0));
        assert_eq!(loader.format("{temp:.0f} K").unwrap(), "295 K");
        assert_eq!(OPENED.load(Ordering::Relaxed) - before, 2);

        loader.map_mut().add_named_expression("ratio", "y / x");
        let last = loader.get_data("x", &Selection::index(2)).unwrap();
        assert_eq!(last, Value::Float(4.0));
        let ratio = loader.eval("ratio").unwrap().to_array().unwrap();
        assert_abs_diff_eq!(ratio[[1]], 2.5);
        assert_abs_diff_eq!(ratio[[2]], 1.75);
        assert!(loader.to_string().starts_with("FileLoader(run.nxs)"));
    }

    fn open_scan(path: &str) -> Result<Arc<dyn DataSource>> {
        Ok(Arc::new(
            MemoryFile::new(path)
                .with_group(
                    "/entry/measurement",
                    Attributes::new()
                        .with("NX_class", "NXdata")
                        .with("signal", "counts")
                        .with("axes", "tth"),
                )
                .with_dataset(
                    "/entry/measurement/tth",
                    vec![10.0, 20.0, 30.0],
                    Attributes::new().with("units", "deg"),
                )
                .with_dataset("/entry/measurement/counts", vec![5.0, 9.0, 4.0], Attributes::new()),
        ))
    }

    #[test]
    fn test_plot_data_from_default_group() {
        let loader = FileLoader::with_opener("/data/scan.nxs", &MapConfig::default(), open_scan).unwrap();
        let plot = loader.plot_data().unwrap();
        assert_eq!(plot.title, "scan.nxs");
        assert_eq!(plot.axes_labels, vec!["tth [deg]".to_string()]);
        assert_eq!(plot.signal_label, "counts");
        assert_eq!(plot.axes[0].to_string(), "[10.0, 20.0, 30.0]");
        assert_abs_diff_eq!(plot.signal.to_array().unwrap()[[1]], 9.0);

        let bare = FileLoader::with_opener("bare.h5", &MapConfig::default(), |path: &str| {
            Ok(Arc::new(MemoryFile::new(path)) as Arc<dyn DataSource>)
        })
        .unwrap();
        assert!(matches!(
            bare.plot_data(),
            Err(Error::InFile { source, .. }) if source.is_not_found()
        ));
    }
}
