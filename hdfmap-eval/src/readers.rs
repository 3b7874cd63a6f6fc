//! Direct dataset readers on a map, without expression parsing.

use std::collections::BTreeMap;

use hdfmap_core::{round_string_floats, DataSource, Error, Result, Selection, Value};
use hdfmap_namespace::HdfMap;

/// Reads named data from a container laid out like the map's file.
pub trait MapReaders {
    /// Reads `name` (a name, path, group or class) with `selection`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name does not resolve or is missing
    /// from `source` and no `default` is given.
    fn get_data(
        &self,
        source: &dyn DataSource,
        name: &str,
        selection: &Selection,
        default: Option<Value>,
    ) -> Result<Value>;

    /// Reads `name` as text, optionally followed by its units.
    ///
    /// # Errors
    /// Same as [`MapReaders::get_data`].
    fn get_string(&self, source: &dyn DataSource, name: &str, units: bool) -> Result<String>;

    /// One frame of the default image; the middle frame when `index` is `None`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the map has no default image.
    fn get_image(&self, source: &dyn DataSource, index: Option<isize>) -> Result<Value>;

    /// Every scalar value in the map. Unreadable entries are skipped.
    fn get_metadata(&self, source: &dyn DataSource) -> BTreeMap<String, Value>;

    /// Every scannable array.
    ///
    /// # Errors
    /// Returns the first read error.
    fn get_scannables(&self, source: &dyn DataSource) -> Result<BTreeMap<String, Value>>;

    /// One attribute of a dataset or group, as stored in `source`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name or the attribute is missing.
    fn get_attr_value(&self, source: &dyn DataSource, name: &str, attr: &str) -> Result<Value>;
}

impl MapReaders for HdfMap {
    fn get_data(
        &self,
        source: &dyn DataSource,
        name: &str,
        selection: &Selection,
        default: Option<Value>,
    ) -> Result<Value> {
        let read = self
            .path_of(name)
            .and_then(|path| source.read(&path, selection));
        match (read, default) {
            (Ok(data), _) => Ok(Value::from_data(data)),
            (Err(e), Some(default)) if e.is_not_found() => {
                log::debug!("{name} not in {}, using default", source.filepath());
                Ok(default)
            }
            (Err(e), _) => Err(e),
        }
    }

    fn get_string(&self, source: &dyn DataSource, name: &str, units: bool) -> Result<String> {
        let value = self.get_data(source, name, &Selection::all(), None)?;
        let mut text = value.to_string();
        if units {
            let unit = self
                .path_of(name)
                .ok()
                .and_then(|path| source.info(&path).ok())
                .and_then(|info| info.attributes.text(&self.config().units_attribute));
            if let Some(unit) = unit.filter(|u| !u.is_empty()) {
                text = format!("{text} {unit}");
            }
        }
        Ok(round_string_floats(&text))
    }

    fn get_image(&self, source: &dyn DataSource, index: Option<isize>) -> Result<Value> {
        let path = self
            .image_path()
            .ok_or_else(|| Error::NotFound(format!("no default image in {}", self.filepath())))?;
        let info = source.info(path)?;
        let selection = if info.shape.len() >= 3 {
            #[allow(clippy::cast_possible_wrap)]
            let middle = (info.shape[0] / 2) as isize;
            Selection::index(index.unwrap_or(middle))
        } else {
            Selection::all()
        };
        Ok(Value::from_data(source.read(path, &selection)?))
    }

    fn get_metadata(&self, source: &dyn DataSource) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        for (name, path) in self.values() {
            match source.read(path, &Selection::all()) {
                Ok(data) => {
                    metadata.insert(name.clone(), Value::from_data(data));
                }
                Err(e) => log::warn!("metadata {name} skipped: {e}"),
            }
        }
        metadata
    }

    fn get_scannables(&self, source: &dyn DataSource) -> Result<BTreeMap<String, Value>> {
        self.scannables()
            .iter()
            .map(|(name, path)| {
                let data = source.read(path, &Selection::all())?;
                Ok((name.clone(), Value::from_data(data)))
            })
            .collect()
    }

    fn get_attr_value(&self, source: &dyn DataSource, name: &str, attr: &str) -> Result<Value> {
        let path = self.path_of(name)?;
        source
            .info(&path)?
            .attributes
            .get(attr)
            .map(Value::from)
            .ok_or_else(|| Error::NotFound(format!("attribute '{attr}' on '{name}'")))
    }
}
