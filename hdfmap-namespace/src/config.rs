//! Namespace construction settings.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hdfmap_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Attribute names and class tags recognized while building a map.
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Group attribute holding the class tag.
    pub class_attribute: String,
    /// Attribute naming the default child (entry or data group).
    pub default_attribute: String,
    /// Data-group attribute naming the signal dataset.
    pub signal_attribute: String,
    /// Data-group attribute naming the axis dataset(s).
    pub axes_attribute: String,
    /// Dataset attribute giving an alternative short name.
    pub local_name_attribute: String,
    /// Dataset attribute holding the unit string.
    pub units_attribute: String,
    /// Class tag of plottable data groups.
    pub data_class: String,
    /// Class tag of detector groups.
    pub detector_class: String,
    /// Only descend into groups whose name or class is listed.
    pub groups: Option<Vec<String>>,
    /// Only descend into the default (or first) top-level entry.
    pub default_entry_only: bool,
    /// Maximum group nesting followed during the scan.
    pub max_depth: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            class_attribute: "NX_class".to_string(),
            default_attribute: "default".to_string(),
            signal_attribute: "signal".to_string(),
            axes_attribute: "axes".to_string(),
            local_name_attribute: "local_name".to_string(),
            units_attribute: "units".to_string(),
            data_class: "NXdata".to_string(),
            detector_class: "NXdetector".to_string(),
            groups: None,
            default_entry_only: false,
            max_depth: 64,
        }
    }
}

impl MapConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the file cannot be opened or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads configuration from a JSON string.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Sets the class tag attribute.
    #[must_use]
    pub fn with_class_attribute(mut self, name: impl Into<String>) -> Self {
        self.class_attribute = name.into();
        self
    }

    /// Sets the data-group class tag.
    #[must_use]
    pub fn with_data_class(mut self, class: impl Into<String>) -> Self {
        self.data_class = class.into();
        self
    }

    /// Sets the detector-group class tag.
    #[must_use]
    pub fn with_detector_class(mut self, class: impl Into<String>) -> Self {
        self.detector_class = class.into();
        self
    }

    /// Restricts recursion to groups with these names or classes.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Only scan the default entry.
    #[must_use]
    pub fn with_default_entry_only(mut self, enabled: bool) -> Self {
        self.default_entry_only = enabled;
        self
    }

    /// Sets the maximum scan depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Whether the scan should descend into a group named `name` with class `class`.
    #[must_use]
    pub fn descends_into(&self, name: &str, class: Option<&str>) -> bool {
        match &self.groups {
            None => true,
            Some(allowed) => allowed
                .iter()
                .any(|g| g == name || class.is_some_and(|c| c == g)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MapConfig::default();
        assert_eq!(config.class_attribute, "NX_class");
        assert_eq!(config.data_class, "NXdata");
        assert_eq!(config.max_depth, 64);
        assert!(config.descends_into("anything", None));
    }

    #[test]
    fn test_partial_json() {
        let config = MapConfig::from_json(r#"{"detector_class": "NXcamera", "groups": ["entry"]}"#)
            .expect("should parse partial config");
        assert_eq!(config.detector_class, "NXcamera");
        assert_eq!(config.signal_attribute, "signal");
        assert!(config.descends_into("entry", None));
        assert!(!config.descends_into("instrument", Some("NXinstrument")));
    }

    #[test]
    fn test_invalid_json() {
        let err = MapConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_depth": 3, "default_entry_only": true}}"#).unwrap();
        let config = MapConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_depth, 3);
        assert!(config.default_entry_only);
    }

    #[test]
    fn test_builders() {
        let config = MapConfig::new()
            .with_groups(["measurement", "NXdata"])
            .with_max_depth(4);
        assert!(config.descends_into("data", Some("NXdata")));
        assert_eq!(config.max_depth, 4);
    }
}
