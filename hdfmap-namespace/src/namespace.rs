//! The queryable namespace built from one container.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};

use hdfmap_core::{
    expression_safe_name, is_identifier, leaf_name, parent_path, AttrValue, Attributes,
    DataSource, DatasetRecord, Error, GroupRecord, Result, Value,
};
use regex::Regex;

use crate::conventions::{self, most_common_shape, most_common_size, Conventions, Records};
use crate::names::{build_names, short_name, split_links};
use crate::scanner::{ScanIssue, TreeScanner};
use crate::MapConfig;

/// How caller-injected locals rank against names found in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalPriority {
    /// Locals shadow file names.
    #[default]
    PreferLocal,
    /// File data wins whenever the name exists in the file.
    PreferFile,
}

/// What [`HdfMap::find_by_substring`] matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTarget {
    Names,
    Paths,
}

/// A named rectangular region anchored to an image dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiDefinition {
    /// Name or path of the image dataset.
    pub base_image: String,
    /// Expression for the row of the region centre.
    pub center_row: String,
    /// Expression for the column of the region centre.
    pub center_col: String,
    pub height: usize,
    pub width: usize,
}

/// Name-based view of a hierarchical container.
///
/// Built once from a representative file and reusable against any file with
/// the same layout. Record and category maps never change after
/// construction; locals, named expressions and regions of interest may be
/// added at any time.
#[derive(Debug, Clone)]
pub struct HdfMap {
    filepath: String,
    config: MapConfig,
    groups: Vec<GroupRecord>,
    datasets: Vec<DatasetRecord>,
    order: Vec<String>,
    group_index: HashMap<String, usize>,
    dataset_index: HashMap<String, usize>,
    issues: Vec<ScanIssue>,
    conventions: Conventions,
    values: BTreeMap<String, String>,
    arrays: BTreeMap<String, String>,
    image_data: BTreeMap<String, String>,
    scannables: BTreeMap<String, String>,
    combined: BTreeMap<String, String>,
    local_overrides: BTreeMap<String, Value>,
    named_expressions: BTreeMap<String, String>,
    rois: BTreeMap<String, RoiDefinition>,
    local_priority: LocalPriority,
}

impl HdfMap {
    /// Builds a map from `source` with the default configuration.
    ///
    /// # Errors
    /// Returns [`Error::Scan`] if the root group cannot be read.
    pub fn from_source(source: &dyn DataSource) -> Result<Self> {
        Self::build(source, &MapConfig::default())
    }

    /// Scans `source` and derives every category map.
    ///
    /// # Errors
    /// Returns [`Error::Scan`] if the root group cannot be read.
    pub fn build(source: &dyn DataSource, config: &MapConfig) -> Result<Self> {
        let report = TreeScanner::new(source, config).scan()?;
        for issue in &report.issues {
            log::warn!("scan issue in {}: {issue}", source.filepath());
        }

        let (datasets, links) = split_links(report.datasets);
        let names = build_names(&datasets, config);
        let records = Records::new(&report.groups, &datasets, &links);
        let conventions = conventions::resolve(&records, &names, config);

        let mut map = Self {
            filepath: source.filepath().to_string(),
            config: config.clone(),
            group_index: index_of(report.groups.iter().map(|g| g.path.as_str())),
            dataset_index: link_index(index_of(datasets.iter().map(|d| d.path.as_str())), links),
            groups: report.groups,
            datasets,
            order: report.order,
            issues: report.issues,
            values: names.values,
            arrays: names.arrays,
            image_data: BTreeMap::new(),
            scannables: BTreeMap::new(),
            combined: BTreeMap::new(),
            conventions,
            local_overrides: BTreeMap::new(),
            named_expressions: BTreeMap::new(),
            rois: BTreeMap::new(),
            local_priority: LocalPriority::default(),
        };
        map.add_default_aliases();
        map.image_data = map.build_image_data();
        let size = map.conventions.scan_size;
        map.scannables = map.scannables_of_size(size);
        map.build_combined();
        log::info!(
            "mapped {}: {} names, {} scannables of length {:?}",
            map.filepath,
            map.combined.len(),
            map.scannables.len(),
            size
        );
        Ok(map)
    }

    fn add_default_aliases(&mut self) {
        let mut aliases: Vec<(String, String)> = Vec::new();
        if let Some(signal) = &self.conventions.signal {
            aliases.push(("signal".to_string(), signal.clone()));
        }
        if let Some(first) = self.conventions.axes.first() {
            aliases.push(("axes".to_string(), first.clone()));
        }
        if self.conventions.axes.len() > 1 {
            for (i, axis) in self.conventions.axes.iter().enumerate() {
                aliases.push((format!("axes{i}"), axis.clone()));
            }
        }
        for (alias, path) in aliases {
            let Some(record) = self.dataset(&path) else {
                continue;
            };
            let table = if record.is_value() {
                &mut self.values
            } else {
                &mut self.arrays
            };
            table.entry(alias).or_insert(path);
        }
    }

    fn build_image_data(&self) -> BTreeMap<String, String> {
        let mut images: BTreeMap<String, String> = self
            .arrays
            .iter()
            .filter(|(_, path)| self.dataset(path).is_some_and(|d| d.ndim() >= 3))
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();
        if let Some(image) = &self.conventions.image {
            images.insert(self.preferred_name(image), image.clone());
            // Detector images are also reachable as `<detector>_<dataset>`.
            let parent = parent_path(image);
            let in_detector = self
                .group(parent)
                .and_then(|g| g.class_name.as_deref())
                .is_some_and(|c| c == self.config.detector_class);
            if in_detector {
                let alias = expression_safe_name(&format!("{}_{}", leaf_name(parent), leaf_name(image)));
                if is_identifier(&alias)
                    && !self.arrays.contains_key(&alias)
                    && !self.values.contains_key(&alias)
                {
                    images.entry(alias).or_insert_with(|| image.clone());
                }
            }
        }
        images
    }

    fn scannables_of_size(&self, size: Option<usize>) -> BTreeMap<String, String> {
        let Some(size) = size else {
            return BTreeMap::new();
        };
        self.arrays
            .iter()
            .filter(|(_, path)| self.dataset(path).is_some_and(|d| d.size == size))
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect()
    }

    fn build_combined(&mut self) {
        let mut combined = self.values.clone();
        for layer in [&self.arrays, &self.image_data, &self.scannables] {
            combined.extend(layer.iter().map(|(n, p)| (n.clone(), p.clone())));
        }
        self.combined = combined;
    }

    /// Array name of `path`, preferring its short name over aliases.
    fn preferred_name(&self, path: &str) -> String {
        let short = short_name(path);
        let names = self.names_in(&self.arrays, path);
        if names.contains(&short) || names.is_empty() {
            short
        } else {
            names[0].clone()
        }
    }

    fn names_in(&self, table: &BTreeMap<String, String>, path: &str) -> Vec<String> {
        table
            .iter()
            .filter(|(_, p)| *p == path)
            .map(|(n, _)| n.clone())
            .collect()
    }

    // ---- records ----

    /// Identifier of the file the map was built from.
    #[must_use]
    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    #[must_use]
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Group records in encounter order.
    #[must_use]
    pub fn groups(&self) -> &[GroupRecord] {
        &self.groups
    }

    /// Dataset records in encounter order.
    #[must_use]
    pub fn datasets(&self) -> &[DatasetRecord] {
        &self.datasets
    }

    #[must_use]
    pub fn group(&self, path: &str) -> Option<&GroupRecord> {
        self.group_index.get(path).map(|&i| &self.groups[i])
    }

    #[must_use]
    pub fn dataset(&self, path: &str) -> Option<&DatasetRecord> {
        self.dataset_index.get(path).map(|&i| &self.datasets[i])
    }

    /// Nodes skipped during the scan.
    #[must_use]
    pub fn scan_issues(&self) -> &[ScanIssue] {
        &self.issues
    }

    // ---- category maps ----

    #[must_use]
    pub fn classes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.conventions.classes
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    #[must_use]
    pub fn arrays(&self) -> &BTreeMap<String, String> {
        &self.arrays
    }

    #[must_use]
    pub fn scannables(&self) -> &BTreeMap<String, String> {
        &self.scannables
    }

    #[must_use]
    pub fn image_data(&self) -> &BTreeMap<String, String> {
        &self.image_data
    }

    /// Merged view: scannables > image data > arrays > values.
    #[must_use]
    pub fn combined(&self) -> &BTreeMap<String, String> {
        &self.combined
    }

    /// Default data group path.
    #[must_use]
    pub fn data_group_path(&self) -> Option<&str> {
        self.conventions.data_group.as_deref()
    }

    /// Default signal dataset path.
    #[must_use]
    pub fn signal_path(&self) -> Option<&str> {
        self.conventions.signal.as_deref()
    }

    /// Default axis dataset paths.
    #[must_use]
    pub fn axes_paths(&self) -> &[String] {
        &self.conventions.axes
    }

    /// Default image dataset path.
    #[must_use]
    pub fn image_path(&self) -> Option<&str> {
        self.conventions.image.as_deref()
    }

    /// Element count shared by the scannables.
    #[must_use]
    pub fn scannables_length(&self) -> Option<usize> {
        self.scannables
            .values()
            .next()
            .and_then(|p| self.dataset(p))
            .map(|d| d.size)
    }

    /// Most frequent array size greater than one.
    #[must_use]
    pub fn most_common_size(&self) -> Option<usize> {
        most_common_size(self.arrays.values().filter_map(|p| self.dataset(p)))
    }

    /// Most frequent non-scalar array shape.
    #[must_use]
    pub fn most_common_shape(&self) -> Option<Vec<usize>> {
        most_common_shape(self.arrays.values().filter_map(|p| self.dataset(p)))
    }

    /// Re-derives the scannables from arrays of exactly `size` elements.
    pub fn generate_scannables(&mut self, size: usize) {
        self.scannables = self.scannables_of_size(Some(size));
        self.build_combined();
    }

    /// Re-derives the scannables from the datasets of one group, using the
    /// size of its first dataset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the group is unknown or holds no datasets.
    pub fn generate_scannables_from_group(&mut self, group: &str) -> Result<()> {
        let path = self.group_path_of(group)?;
        let members: Vec<&DatasetRecord> = self
            .group(&path)
            .map(|g| g.child_paths.iter().filter_map(|p| self.dataset(p)).collect())
            .unwrap_or_default();
        let size = members
            .first()
            .map(|d| d.size)
            .ok_or_else(|| Error::NotFound(format!("no datasets in group '{group}'")))?;
        let mut scannables = BTreeMap::new();
        for record in members.iter().filter(|d| d.size == size) {
            scannables.insert(self.preferred_name(&record.path), record.path.clone());
        }
        self.scannables = scannables;
        self.build_combined();
        Ok(())
    }

    // ---- lookups ----

    /// Resolves a name, path, class tag or group name to a path.
    ///
    /// Order: an exact path, a local override holding a path, the combined
    /// namespace, the first group of a class, then the first group with
    /// that name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if nothing matches.
    pub fn path_of(&self, name: &str) -> Result<String> {
        if self.is_path(name) {
            return Ok(name.to_string());
        }
        if let Some(Value::Str(alias)) = self.local_overrides.get(name) {
            if self.is_path(alias) {
                return Ok(alias.clone());
            }
        }
        if let Some(path) = self.combined.get(name) {
            return Ok(path.clone());
        }
        self.group_path_of(name)
    }

    /// Canonical name of a name or path: its short name when that is
    /// mapped to the same path, otherwise the first combined name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the path has no name.
    pub fn name_of(&self, name: &str) -> Result<String> {
        let path = self.path_of(name)?;
        let short = short_name(&path);
        if self.combined.get(&short) == Some(&path) {
            return Ok(short);
        }
        self.names_in(&self.combined, &path)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("no name for '{path}'")))
    }

    fn is_path(&self, path: &str) -> bool {
        self.dataset_index.contains_key(path) || self.group_index.contains_key(path)
    }

    /// Resolves a group path, class tag or group name to a group path.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no group matches.
    pub fn group_path_of(&self, name: &str) -> Result<String> {
        if self.group_index.contains_key(name) {
            return Ok(name.to_string());
        }
        if let Some(path) = self.class_path(name) {
            return Ok(path.to_string());
        }
        self.groups
            .iter()
            .find(|g| !g.name.is_empty() && g.name == name)
            .map(|g| g.path.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Path of the first group declaring `class`.
    #[must_use]
    pub fn class_path(&self, class: &str) -> Option<&str> {
        self.conventions
            .classes
            .get(class)
            .and_then(|paths| paths.first())
            .map(String::as_str)
    }

    /// Every dataset path below a group (by path, class or name), in encounter order.
    #[must_use]
    pub fn datasets_of_group(&self, group: &str) -> Vec<String> {
        let Ok(root) = self.group_path_of(group) else {
            return Vec::new();
        };
        let prefix = if root == "/" {
            "/".to_string()
        } else {
            format!("{root}/")
        };
        self.datasets
            .iter()
            .filter(|d| d.path.starts_with(&prefix))
            .map(|d| d.path.clone())
            .collect()
    }

    /// Names or paths containing `pattern`, in encounter order.
    ///
    /// With `whole_word`, the pattern must not be part of a longer word.
    #[must_use]
    pub fn find_by_substring(
        &self,
        pattern: &str,
        target: SearchTarget,
        whole_word: bool,
    ) -> Vec<String> {
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(pattern))).ok();
        let matches = |text: &str| match (&word, whole_word) {
            (Some(re), true) => re.is_match(text),
            _ => text.contains(pattern),
        };
        let mut found = Vec::new();
        for record in &self.datasets {
            match target {
                SearchTarget::Paths => {
                    if matches(&record.path) {
                        found.push(record.path.clone());
                    }
                }
                SearchTarget::Names => {
                    for name in self.names_in(&self.combined, &record.path) {
                        if matches(&name) && !found.contains(&name) {
                            found.push(name);
                        }
                    }
                }
            }
        }
        found
    }

    /// Paths of groups and datasets carrying attribute `attr`, in encounter order.
    #[must_use]
    pub fn find_by_attribute(&self, attr: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|path| self.attributes_at(path).is_some_and(|a| a.contains(attr)))
            .cloned()
            .collect()
    }

    fn attributes_at(&self, path: &str) -> Option<&Attributes> {
        self.dataset(path)
            .map(|d| &d.attributes)
            .or_else(|| self.group(path).map(|g| &g.attributes))
    }

    fn dataset_of(&self, name: &str) -> Result<&DatasetRecord> {
        let path = self.path_of(name)?;
        self.dataset(&path)
            .ok_or_else(|| Error::NotFound(format!("'{name}' is not a dataset")))
    }

    /// Element count of a dataset (0 for scalars).
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` is not a mapped dataset.
    pub fn size_of(&self, name: &str) -> Result<usize> {
        self.dataset_of(name).map(|d| d.size)
    }

    /// Shape of a dataset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` is not a mapped dataset.
    pub fn shape_of(&self, name: &str) -> Result<Vec<usize>> {
        self.dataset_of(name).map(|d| d.shape.clone())
    }

    /// Attributes of a dataset or group.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` does not resolve.
    pub fn attrs_of(&self, name: &str) -> Result<&Attributes> {
        let path = self.path_of(name)?;
        self.attributes_at(&path)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// One attribute of a dataset or group, as scanned.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name or the attribute is missing.
    pub fn attr_of(&self, name: &str, attr: &str) -> Result<&AttrValue> {
        self.attrs_of(name)?
            .get(attr)
            .ok_or_else(|| Error::NotFound(format!("attribute '{attr}' on '{name}'")))
    }

    // ---- extensions ----

    /// Injects a local value; the last write wins.
    pub fn add_local(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        log::debug!("local {name} added");
        self.local_overrides.insert(name, value.into());
    }

    /// Injects several local values.
    pub fn add_locals<I, K, V>(&mut self, locals: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in locals {
            self.add_local(name, value);
        }
    }

    #[must_use]
    pub fn local_overrides(&self) -> &BTreeMap<String, Value> {
        &self.local_overrides
    }

    #[must_use]
    pub fn local_priority(&self) -> LocalPriority {
        self.local_priority
    }

    pub fn set_local_priority(&mut self, priority: LocalPriority) {
        self.local_priority = priority;
    }

    /// Registers a shortcut expanded before evaluation.
    pub fn add_named_expression(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        let name = name.into();
        let expression = expression.into();
        log::debug!("named expression {name} = {expression}");
        self.named_expressions.insert(name, expression);
    }

    #[must_use]
    pub fn named_expressions(&self) -> &BTreeMap<String, String> {
        &self.named_expressions
    }

    /// Registers a region of interest on an image dataset.
    ///
    /// `base_image` defaults to the map's default image.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRoi`] for a zero height or width or an
    /// unusable name, and [`Error::NotFound`] if no image can be resolved.
    pub fn add_roi(
        &mut self,
        name: &str,
        center_row: impl Into<String>,
        center_col: impl Into<String>,
        height: usize,
        width: usize,
        base_image: Option<&str>,
    ) -> Result<()> {
        if height == 0 || width == 0 {
            return Err(Error::InvalidRoi(format!(
                "'{name}' must have a positive size, got {height}x{width}"
            )));
        }
        if !is_identifier(name) {
            return Err(Error::InvalidRoi(format!("'{name}' is not a valid identifier")));
        }
        let base_image = match base_image {
            Some(base) => {
                self.path_of(base)?;
                base.to_string()
            }
            None => self
                .image_path()
                .map(str::to_string)
                .ok_or_else(|| Error::NotFound("default image for region of interest".into()))?,
        };
        let roi = RoiDefinition {
            base_image,
            center_row: center_row.into(),
            center_col: center_col.into(),
            height,
            width,
        };
        log::debug!("roi {name}: {roi:?}");
        self.rois.insert(name.to_string(), roi);
        Ok(())
    }

    #[must_use]
    pub fn rois(&self) -> &BTreeMap<String, RoiDefinition> {
        &self.rois
    }

    #[must_use]
    pub fn roi(&self, name: &str) -> Option<&RoiDefinition> {
        self.rois.get(name)
    }

    // ---- info ----

    /// Combined names with shapes and paths.
    #[must_use]
    pub fn info_names(&self) -> String {
        format!("Combined Namespace:\n{}", self.info_table(&self.combined))
    }

    /// Scannable names with shapes and paths.
    #[must_use]
    pub fn info_scannables(&self) -> String {
        format!("Scannables Namespace:\n{}", self.info_table(&self.scannables))
    }

    /// Groups and class index.
    #[must_use]
    pub fn info_groups(&self) -> String {
        let mut out = format!("{:?}\nGroups:\n", Summary(self));
        for group in &self.groups {
            let class = group.class_name.as_deref().unwrap_or("Group");
            let _ = writeln!(out, "{:>30}: {class}", group.path);
        }
        out.push_str("Classes:\n");
        for (class, paths) in &self.conventions.classes {
            let _ = writeln!(out, "{class:>30}: {}", paths.join(", "));
        }
        out
    }

    fn info_table(&self, table: &BTreeMap<String, String>) -> String {
        table
            .iter()
            .map(|(name, path)| {
                let shape = self
                    .dataset(path)
                    .map(|d| format!("{:?}", d.shape))
                    .unwrap_or_default();
                format!("{name:>20}: {shape:<12}: {path}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One-line description used as the heading of info output.
struct Summary<'a>(&'a HdfMap);

impl fmt::Debug for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HdfMap based on '{}'", self.0.filepath)
    }
}

impl fmt::Display for HdfMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}", Summary(self))?;
        writeln!(f, "{}", self.info_names())
    }
}

fn index_of<'a>(paths: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    paths
        .enumerate()
        .map(|(i, p)| (p.to_string(), i))
        .collect()
}

/// Adds link paths to `index`, pointing at their target's record.
fn link_index(mut index: HashMap<String, usize>, links: HashMap<String, String>) -> HashMap<String, usize> {
    for (link, target) in links {
        if let Some(&i) = index.get(&target) {
            index.insert(link, i);
        }
    }
    index
}
