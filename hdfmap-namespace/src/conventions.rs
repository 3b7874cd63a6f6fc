//! Default signal, axes, image and scan length.
//!
//! Each decision first looks for declared convention attributes and falls
//! back to statistics over the scanned records otherwise.

use std::collections::{BTreeMap, HashMap};

use hdfmap_core::{join_path, DatasetRecord, GroupRecord};

use crate::names::NameTables;
use crate::MapConfig;

/// Decisions derived from convention attributes and statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conventions {
    /// Default data group, if one was found.
    pub data_group: Option<String>,
    /// Default signal dataset.
    pub signal: Option<String>,
    /// Default axis datasets, first axis first.
    pub axes: Vec<String>,
    /// Default image dataset.
    pub image: Option<String>,
    /// Common array length of scanned quantities.
    pub scan_size: Option<usize>,
    /// Class tag → group paths, in encounter order.
    pub classes: BTreeMap<String, Vec<String>>,
}

/// Read-only view over the scanned records used by the heuristics.
pub(crate) struct Records<'a> {
    pub groups: &'a [GroupRecord],
    pub datasets: &'a [DatasetRecord],
    group_index: HashMap<&'a str, usize>,
    dataset_index: HashMap<&'a str, usize>,
}

impl<'a> Records<'a> {
    /// `links` maps link paths onto recorded datasets, so group members
    /// reached through a link resolve to their target.
    pub(crate) fn new(
        groups: &'a [GroupRecord],
        datasets: &'a [DatasetRecord],
        links: &'a HashMap<String, String>,
    ) -> Self {
        let mut dataset_index: HashMap<&'a str, usize> = datasets
            .iter()
            .enumerate()
            .map(|(i, d)| (d.path.as_str(), i))
            .collect();
        for (link, target) in links {
            if let Some(&i) = dataset_index.get(target.as_str()) {
                dataset_index.insert(link.as_str(), i);
            }
        }
        Self {
            groups,
            datasets,
            group_index: groups.iter().enumerate().map(|(i, g)| (g.path.as_str(), i)).collect(),
            dataset_index,
        }
    }

    fn group(&self, path: &str) -> Option<&'a GroupRecord> {
        self.group_index.get(path).map(|&i| &self.groups[i])
    }

    fn dataset(&self, path: &str) -> Option<&'a DatasetRecord> {
        self.dataset_index.get(path).map(|&i| &self.datasets[i])
    }

    fn member_datasets(&self, group: &GroupRecord) -> Vec<&'a DatasetRecord> {
        group
            .child_paths
            .iter()
            .filter_map(|p| self.dataset(p))
            .collect()
    }

    fn is_below(path: &str, group: &str) -> bool {
        group == "/" || path.starts_with(&format!("{group}/"))
    }
}

/// Builds the class index: declared class tag → group paths.
#[must_use]
pub fn class_index(groups: &[GroupRecord]) -> BTreeMap<String, Vec<String>> {
    let mut classes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for group in groups {
        if let Some(class) = &group.class_name {
            classes.entry(class.clone()).or_default().push(group.path.clone());
        }
    }
    classes
}

/// Most frequent array size greater than one; ties go to the larger size.
#[must_use]
pub fn most_common_size<'a>(datasets: impl IntoIterator<Item = &'a DatasetRecord>) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for size in datasets.into_iter().map(|d| d.size).filter(|&s| s > 1) {
        *counts.entry(size).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(size, count)| (count, size))
        .map(|(size, _)| size)
}

/// Most frequent non-scalar shape; ties go to the larger element count.
#[must_use]
pub fn most_common_shape<'a>(
    datasets: impl IntoIterator<Item = &'a DatasetRecord>,
) -> Option<Vec<usize>> {
    let mut counts: HashMap<&[usize], (usize, usize)> = HashMap::new();
    for record in datasets.into_iter().filter(|d| !d.shape.is_empty()) {
        let entry = counts.entry(record.shape.as_slice()).or_insert((0, record.size));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(shape, (count, size))| (count, size, shape.to_vec()))
        .map(|(shape, _)| shape.to_vec())
}

/// Resolves every convention decision.
pub(crate) fn resolve(records: &Records<'_>, names: &NameTables, config: &MapConfig) -> Conventions {
    let classes = class_index(records.groups);
    let data_group = default_data_group(records, config);
    let (signal, axes) = data_group
        .as_ref()
        .and_then(|g| records.group(g))
        .map(|g| signal_and_axes(records, g, config))
        .unwrap_or_default();
    let image = default_image(records, &classes, names, config);

    // The data group only fixes the scan length when it declares its signal or axes.
    let declared = data_group
        .as_deref()
        .and_then(|g| records.group(g))
        .is_some_and(|g| {
            g.attributes.get(&config.signal_attribute).is_some()
                || g.attributes.get(&config.axes_attribute).is_some()
        });
    let scan_size = signal
        .iter()
        .chain(axes.first())
        .filter(|_| declared)
        .find_map(|p| records.dataset(p))
        .map(|d| d.size)
        .filter(|&size| size > 1)
        .or_else(|| {
            most_common_size(
                names
                    .arrays
                    .values()
                    .filter_map(|p| records.dataset(p)),
            )
        });

    if let Some(group) = &data_group {
        log::info!("default data group: {group}");
    }
    log::info!("signal: {signal:?}, axes: {axes:?}, image: {image:?}, scan size: {scan_size:?}");
    Conventions {
        data_group,
        signal,
        axes,
        image,
        scan_size,
        classes,
    }
}

/// Top-level entry named by the root `default` attribute, else the first group.
fn default_entry<'a>(records: &Records<'a>, config: &MapConfig) -> Option<&'a GroupRecord> {
    let root = records.group("/")?;
    root.attributes
        .text(&config.default_attribute)
        .and_then(|name| records.group(&join_path("/", &name)))
        .or_else(|| root.child_paths.iter().find_map(|p| records.group(p)))
}

fn default_data_group(records: &Records<'_>, config: &MapConfig) -> Option<String> {
    let is_populated_data = |g: &&GroupRecord| {
        g.class_name.as_deref() == Some(config.data_class.as_str())
            && !records.member_datasets(g).is_empty()
    };
    if let Some(entry) = default_entry(records, config) {
        let declared = entry
            .attributes
            .text(&config.default_attribute)
            .and_then(|name| records.group(&join_path(&entry.path, &name)));
        if let Some(group) = declared {
            return Some(group.path.clone());
        }
        if let Some(group) = records
            .groups
            .iter()
            .filter(|g| Records::is_below(&g.path, &entry.path))
            .find(is_populated_data)
        {
            return Some(group.path.clone());
        }
    }
    records
        .groups
        .iter()
        .find(is_populated_data)
        .map(|g| g.path.clone())
}

fn signal_and_axes(
    records: &Records<'_>,
    group: &GroupRecord,
    config: &MapConfig,
) -> (Option<String>, Vec<String>) {
    let member = |name: &str| {
        let path = join_path(&group.path, name);
        records.dataset(&path).map(|d| d.path.clone())
    };
    let signal = group
        .attributes
        .text(&config.signal_attribute)
        .and_then(|name| member(&name));
    let axes: Vec<String> = group
        .attributes
        .get(&config.axes_attribute)
        .map(|attr| {
            attr.as_text_list()
                .iter()
                .flat_map(|entry| entry.split([',', ':']))
                .map(str::trim)
                .filter(|name| !name.is_empty() && *name != ".")
                .filter_map(member)
                .collect()
        })
        .unwrap_or_default();

    let members = records.member_datasets(group);
    let signal = signal.or_else(|| members.last().map(|d| d.path.clone()));
    let axes = if axes.is_empty() && members.len() > 1 {
        members.first().map(|d| vec![d.path.clone()]).unwrap_or_default()
    } else {
        axes
    };
    (signal, axes)
}

fn default_image(
    records: &Records<'_>,
    classes: &BTreeMap<String, Vec<String>>,
    names: &NameTables,
    config: &MapConfig,
) -> Option<String> {
    let detectors = classes.get(&config.detector_class).cloned().unwrap_or_default();
    let under_detector = |min_rank: usize| {
        detectors.iter().find_map(|group| {
            records
                .datasets
                .iter()
                .filter(|d| Records::is_below(&d.path, group))
                .find(|d| d.ndim() >= min_rank)
                .map(|d| d.path.clone())
        })
    };
    under_detector(3).or_else(|| under_detector(2)).or_else(|| {
        // Largest named array; the first one wins a tie.
        let mut best: Option<&DatasetRecord> = None;
        for record in records.datasets {
            if record.is_value() || !names.arrays.values().any(|p| *p == record.path) {
                continue;
            }
            if best.map_or(true, |b| record.size > b.size) {
                best = Some(record);
            }
        }
        best.map(|d| d.path.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfmap_core::{Attributes, DtypeClass};

    fn dataset(path: &str, shape: &[usize]) -> DatasetRecord {
        DatasetRecord {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            attributes: Attributes::new(),
            link_target: None,
            size: hdfmap_core::shape_size(shape),
            shape: shape.to_vec(),
            dtype_class: DtypeClass::Numeric,
        }
    }

    #[test]
    fn test_most_common_size() {
        let records = vec![
            dataset("/a", &[]),
            dataset("/b", &[5]),
            dataset("/c", &[5]),
            dataset("/d", &[5]),
            dataset("/e", &[3]),
        ];
        assert_eq!(most_common_size(&records), Some(5));
    }

    #[test]
    fn test_most_common_size_tie_prefers_larger() {
        let records = vec![dataset("/a", &[3]), dataset("/b", &[7]), dataset("/c", &[1])];
        assert_eq!(most_common_size(&records), Some(7));
        assert_eq!(most_common_size(&[dataset("/x", &[1])]), None);
    }

    #[test]
    fn test_most_common_shape() {
        let records = vec![
            dataset("/a", &[2, 3]),
            dataset("/b", &[2, 3]),
            dataset("/c", &[6]),
            dataset("/d", &[]),
        ];
        assert_eq!(most_common_shape(&records), Some(vec![2, 3]));
    }

    #[test]
    fn test_class_index_order() {
        let group = |path: &str, class: Option<&str>| GroupRecord {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            attributes: Attributes::new(),
            link_target: None,
            class_name: class.map(str::to_string),
            child_paths: Vec::new(),
        };
        let groups = vec![
            group("/", None),
            group("/entry", Some("NXentry")),
            group("/entry/d1", Some("NXdata")),
            group("/entry/plain", None),
            group("/entry/d2", Some("NXdata")),
        ];
        let classes = class_index(&groups);
        assert_eq!(classes["NXdata"], vec!["/entry/d1", "/entry/d2"]);
        assert_eq!(classes.len(), 2);
    }
}
