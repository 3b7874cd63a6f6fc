//! Short-name derivation for dataset paths.
//!
//! A dataset is named after its final path segment. When two datasets of the
//! same category share that candidate, the parent segment is prepended
//! (`motor_position`). If that still collides, the whole path is used
//! (`a_motor_position`), and as a last resort a numeric suffix is added in
//! encounter order (`a_motor_position_2`).

use std::collections::{BTreeMap, HashMap, HashSet};

use hdfmap_core::{expression_safe_name, is_identifier, DatasetRecord, SEP};

use crate::MapConfig;

/// Name → path tables for the two size categories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameTables {
    /// Scalar datasets (size 0).
    pub values: BTreeMap<String, String>,
    /// Datasets with at least one element.
    pub arrays: BTreeMap<String, String>,
}

/// Name candidates for one path, shortest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidates {
    leaf: String,
    parent: String,
    full: String,
}

fn candidates(path: &str) -> Candidates {
    let segments: Vec<&str> = path.split(SEP).filter(|s| !s.is_empty()).collect();
    // A leaf called "value" is named after the group that holds it.
    let mut end = segments.len();
    if end > 1 && segments[end - 1] == "value" {
        end -= 1;
    }
    let leaf = segments.get(end.wrapping_sub(1)).copied().unwrap_or_default();
    let parent = if end >= 2 {
        format!("{}_{leaf}", segments[end - 2])
    } else {
        leaf.to_string()
    };
    Candidates {
        leaf: expression_safe_name(leaf),
        parent: expression_safe_name(&parent),
        full: expression_safe_name(&segments.join("_")),
    }
}

/// Short name for an arbitrary path, without any collision handling.
#[must_use]
pub fn short_name(path: &str) -> String {
    candidates(path).leaf
}

/// Splits off links to datasets that are themselves recorded.
///
/// The target keeps the record and the short name; the returned table maps
/// each dropped link path to its target.
#[must_use]
pub fn split_links(datasets: Vec<DatasetRecord>) -> (Vec<DatasetRecord>, HashMap<String, String>) {
    let recorded: HashSet<String> = datasets.iter().map(|d| d.path.clone()).collect();
    let mut links = HashMap::new();
    let mut kept = Vec::with_capacity(datasets.len());
    for record in datasets {
        match record.link_target.as_deref() {
            Some(target) if recorded.contains(target) => {
                log::debug!("{} links to {target}", record.path);
                links.insert(record.path, target.to_string());
            }
            _ => kept.push(record),
        }
    }
    (kept, links)
}

/// Derives collision-free names for every dataset, per category.
#[must_use]
pub fn build_names(datasets: &[DatasetRecord], config: &MapConfig) -> NameTables {
    let values: Vec<&DatasetRecord> = datasets.iter().filter(|d| d.is_value()).collect();
    let arrays: Vec<&DatasetRecord> = datasets.iter().filter(|d| !d.is_value()).collect();

    let mut tables = NameTables {
        values: assign(&values),
        arrays: assign(&arrays),
    };
    add_local_names(&values, &config.local_name_attribute, &mut tables.values);
    add_local_names(&arrays, &config.local_name_attribute, &mut tables.arrays);
    tables
}

fn assign(records: &[&DatasetRecord]) -> BTreeMap<String, String> {
    let all: Vec<Candidates> = records.iter().map(|d| candidates(&d.path)).collect();

    let mut leaf_count: HashMap<&str, usize> = HashMap::new();
    for c in &all {
        *leaf_count.entry(c.leaf.as_str()).or_default() += 1;
    }
    let mut parent_count: HashMap<&str, usize> = HashMap::new();
    for c in all.iter().filter(|c| leaf_count[c.leaf.as_str()] > 1) {
        *parent_count.entry(c.parent.as_str()).or_default() += 1;
    }

    let mut used: HashSet<String> = HashSet::new();
    let mut names = BTreeMap::new();
    for (record, c) in records.iter().zip(&all) {
        let name = if leaf_count[c.leaf.as_str()] == 1 && used.insert(c.leaf.clone()) {
            c.leaf.clone()
        } else if parent_count.get(c.parent.as_str()) == Some(&1) && used.insert(c.parent.clone()) {
            c.parent.clone()
        } else if used.insert(c.full.clone()) {
            c.full.clone()
        } else {
            let mut n = 2;
            loop {
                let numbered = format!("{}_{n}", c.full);
                if used.insert(numbered.clone()) {
                    break numbered;
                }
                n += 1;
            }
        };
        if !is_identifier(&name) {
            log::warn!("skipping {}: '{name}' is not a valid identifier", record.path);
            continue;
        }
        log::trace!("{} -> {name}", record.path);
        names.insert(name, record.path.clone());
    }
    names
}

fn add_local_names(records: &[&DatasetRecord], attribute: &str, names: &mut BTreeMap<String, String>) {
    for record in records {
        let Some(local) = record.attributes.text(attribute) else {
            continue;
        };
        let alias = expression_safe_name(short_leaf(&local));
        if !is_identifier(&alias) {
            log::warn!("ignoring {attribute} '{local}' on {}", record.path);
            continue;
        }
        names.entry(alias).or_insert_with(|| record.path.clone());
    }
}

/// Last segment of a `local_name` value such as `pil3_100k.sum` or `/a/b`.
fn short_leaf(local: &str) -> &str {
    local.rsplit(SEP).next().unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfmap_core::{Attributes, DtypeClass};

    fn record(path: &str, size: usize) -> DatasetRecord {
        DatasetRecord {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            attributes: Attributes::new(),
            link_target: None,
            size,
            shape: if size == 0 { vec![] } else { vec![size] },
            dtype_class: DtypeClass::Numeric,
        }
    }

    #[test]
    fn test_unique_leaf_keeps_short_name() {
        let records = vec![record("/entry/a/position", 5), record("/entry/b/energy", 5)];
        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.arrays["position"], "/entry/a/position");
        assert_eq!(tables.arrays["energy"], "/entry/b/energy");
    }

    #[test]
    fn test_collision_uses_parent() {
        let records = vec![record("/entry/x/position", 5), record("/entry/y/position", 5)];
        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.arrays["x_position"], "/entry/x/position");
        assert_eq!(tables.arrays["y_position"], "/entry/y/position");
        assert!(!tables.arrays.contains_key("position"));
    }

    #[test]
    fn test_deep_collision_uses_full_path() {
        let records = vec![
            record("/a/motor/position", 5),
            record("/b/motor/position", 5),
            record("/c/other/position", 5),
        ];
        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.arrays["a_motor_position"], "/a/motor/position");
        assert_eq!(tables.arrays["b_motor_position"], "/b/motor/position");
        assert_eq!(tables.arrays["other_position"], "/c/other/position");
    }

    #[test]
    fn test_categories_are_separate() {
        let records = vec![record("/entry/x/t", 0), record("/entry/y/t", 4)];
        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.values["t"], "/entry/x/t");
        assert_eq!(tables.arrays["t"], "/entry/y/t");
    }

    #[test]
    fn test_value_leaf_and_special_characters() {
        let records = vec![
            record("/entry/sample/temperature/value", 0),
            record("/entry/pil3_100k.sum", 5),
        ];
        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.values["temperature"], "/entry/sample/temperature/value");
        assert_eq!(tables.arrays["pil3_100k_sum"], "/entry/pil3_100k.sum");
    }

    #[test]
    fn test_invalid_identifier_skipped() {
        let records = vec![record("/entry/2theta", 5)];
        let tables = build_names(&records, &MapConfig::default());
        assert!(tables.arrays.is_empty());
    }

    #[test]
    fn test_local_name_alias() {
        let mut rec = record("/entry/instrument/pil/sum", 5);
        rec.attributes.insert("local_name", "pil3_100k.sum");
        let tables = build_names(&[rec], &MapConfig::default());
        assert_eq!(tables.arrays["sum"], "/entry/instrument/pil/sum");
        assert_eq!(tables.arrays["pil3_100k_sum"], "/entry/instrument/pil/sum");
    }

    #[test]
    fn test_link_to_recorded_dataset_not_named() {
        let mut link = record("/entry/data/position", 5);
        link.link_target = Some("/entry/motor/position".to_string());
        let mut outside = record("/entry/data/energy", 5);
        outside.link_target = Some("/elsewhere/energy".to_string());
        let (records, links) = split_links(vec![record("/entry/motor/position", 5), link, outside]);
        assert_eq!(records.len(), 2);
        assert_eq!(links["/entry/data/position"], "/entry/motor/position");

        let tables = build_names(&records, &MapConfig::default());
        assert_eq!(tables.arrays.len(), 2);
        assert_eq!(tables.arrays["position"], "/entry/motor/position");
        assert_eq!(tables.arrays["energy"], "/entry/data/energy");
    }
}
