//! Recursive tree walk producing flat group and dataset records.

use std::fmt;

use hdfmap_core::{
    join_path, shape_size, Attributes, ChildLink, DataSource, DatasetRecord, Error, GroupRecord,
    LinkKind, NodeKind, Result,
};

use crate::MapConfig;

/// A node that could not be read during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: String,
    pub reason: String,
}

impl ScanIssue {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl From<ScanIssue> for Error {
    fn from(issue: ScanIssue) -> Self {
        Error::Scan {
            path: issue.path,
            reason: issue.reason,
        }
    }
}

/// Output of a single tree walk.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Group records, root first, depth-first in declaration order.
    pub groups: Vec<GroupRecord>,
    /// Dataset records in the same encounter order.
    pub datasets: Vec<DatasetRecord>,
    /// Every recorded path (groups and datasets interleaved) in encounter order.
    pub order: Vec<String>,
    /// Nodes that were skipped.
    pub issues: Vec<ScanIssue>,
}

/// Walks a [`DataSource`] once from the root.
pub struct TreeScanner<'a> {
    source: &'a dyn DataSource,
    config: &'a MapConfig,
    report: ScanReport,
}

impl<'a> TreeScanner<'a> {
    /// Creates a scanner over `source`.
    #[must_use]
    pub fn new(source: &'a dyn DataSource, config: &'a MapConfig) -> Self {
        Self {
            source,
            config,
            report: ScanReport::default(),
        }
    }

    /// Scans the whole tree.
    ///
    /// Unreadable nodes, dangling links and link loops are recorded as
    /// [`ScanIssue`]s and the walk continues with their siblings.
    ///
    /// # Errors
    /// Returns [`Error::Scan`] if the root group itself cannot be read.
    pub fn scan(mut self) -> Result<ScanReport> {
        let root = self
            .source
            .info("/")
            .map_err(|e| ScanIssue::new("/", e.to_string()))?;
        if root.kind != NodeKind::Group {
            return Err(ScanIssue::new("/", "root is not a group").into());
        }
        let children = self
            .source
            .list("/")
            .map_err(|e| ScanIssue::new("/", e.to_string()))?;

        let entry = self.default_entry(&root.attributes, &children);
        self.report.groups.push(GroupRecord {
            path: "/".to_string(),
            name: String::new(),
            class_name: root.attributes.text(&self.config.class_attribute),
            attributes: root.attributes,
            link_target: None,
            child_paths: Vec::new(),
        });
        self.report.order.push("/".to_string());

        let mut ancestors = vec!["/".to_string()];
        self.visit_children(0, "/", children, 0, &mut ancestors, entry.as_deref());

        log::debug!(
            "scanned {}: {} groups, {} datasets, {} issues",
            self.source.filepath(),
            self.report.groups.len(),
            self.report.datasets.len(),
            self.report.issues.len()
        );
        Ok(self.report)
    }

    fn default_entry(
        &self,
        root_attrs: &Attributes,
        children: &[ChildLink],
    ) -> Option<String> {
        if !self.config.default_entry_only {
            return None;
        }
        root_attrs
            .text(&self.config.default_attribute)
            .or_else(|| {
                children.iter().find_map(|child| {
                    let path = join_path("/", &child.name);
                    matches!(self.source.info(&path), Ok(info) if info.kind == NodeKind::Group)
                        .then(|| child.name.clone())
                })
            })
    }

    fn visit(&mut self, group_index: usize, path: &str, depth: usize, ancestors: &mut Vec<String>) {
        match self.source.list(path) {
            Ok(children) => self.visit_children(group_index, path, children, depth, ancestors, None),
            Err(e) => {
                log::warn!("cannot list group {path}: {e}");
                self.report.issues.push(ScanIssue::new(path, e.to_string()));
            }
        }
    }

    fn visit_children(
        &mut self,
        group_index: usize,
        parent: &str,
        children: Vec<ChildLink>,
        depth: usize,
        ancestors: &mut Vec<String>,
        only_entry: Option<&str>,
    ) {
        let mut child_paths = Vec::with_capacity(children.len());
        for child in children {
            let path = join_path(parent, &child.name);
            let link_target = match &child.link {
                LinkKind::Hard => None,
                LinkKind::Soft { target } => Some(target.clone()),
                LinkKind::External { file, target } => Some(format!("{file}:{target}")),
            };

            let info = match self.source.info(&path) {
                Ok(info) => info,
                Err(e) => {
                    let reason = match &link_target {
                        Some(target) => format!("unresolved link to {target}: {e}"),
                        None => e.to_string(),
                    };
                    log::warn!("skipping {path}: {reason}");
                    self.report.issues.push(ScanIssue::new(&path, reason));
                    continue;
                }
            };
            child_paths.push(path.clone());
            self.report.order.push(path.clone());

            match info.kind {
                NodeKind::Dataset => {
                    self.report.datasets.push(DatasetRecord {
                        name: child.name,
                        size: shape_size(&info.shape),
                        shape: info.shape,
                        dtype_class: info.dtype,
                        attributes: info.attributes,
                        link_target,
                        path,
                    });
                }
                NodeKind::Group => {
                    let class_name = info.attributes.text(&self.config.class_attribute);
                    let descend = self.should_descend(
                        &child,
                        class_name.as_deref(),
                        &path,
                        depth,
                        ancestors.as_slice(),
                        only_entry,
                    );
                    let index = self.report.groups.len();
                    self.report.groups.push(GroupRecord {
                        path: path.clone(),
                        name: child.name,
                        attributes: info.attributes,
                        link_target,
                        class_name,
                        child_paths: Vec::new(),
                    });
                    if descend {
                        ancestors.push(canonical(&child.link, &path));
                        self.visit(index, &path, depth + 1, ancestors);
                        ancestors.pop();
                    }
                }
            }
        }
        if let Some(group) = self.report.groups.get_mut(group_index) {
            group.child_paths = child_paths;
        }
    }

    fn should_descend(
        &mut self,
        child: &ChildLink,
        class_name: Option<&str>,
        path: &str,
        depth: usize,
        ancestors: &[String],
        only_entry: Option<&str>,
    ) -> bool {
        if only_entry.is_some_and(|entry| entry != child.name) {
            return false;
        }
        if depth > 0 && !self.config.descends_into(&child.name, class_name) {
            return false;
        }
        match &child.link {
            // Soft-linked groups are recorded; their members are reached through the target.
            LinkKind::Soft { target } => {
                if ancestors.iter().any(|a| a == target) {
                    self.report
                        .issues
                        .push(ScanIssue::new(path, format!("link loop through {target}")));
                }
                return false;
            }
            LinkKind::External { .. } => {
                let key = canonical(&child.link, path);
                if ancestors.contains(&key) {
                    self.report
                        .issues
                        .push(ScanIssue::new(path, format!("link loop through {key}")));
                    return false;
                }
            }
            LinkKind::Hard => {}
        }
        if depth + 1 > self.config.max_depth {
            log::warn!("maximum depth {} reached at {path}", self.config.max_depth);
            self.report
                .issues
                .push(ScanIssue::new(path, "maximum scan depth exceeded"));
            return false;
        }
        true
    }
}

fn canonical(link: &LinkKind, path: &str) -> String {
    match link {
        LinkKind::Hard => path.to_string(),
        LinkKind::Soft { target } => target.clone(),
        LinkKind::External { file, target } => format!("{file}:{target}"),
    }
}

/// Convenience wrapper for [`TreeScanner::scan`].
///
/// # Errors
/// Returns [`Error::Scan`] if the root cannot be read.
pub fn scan(source: &dyn DataSource, config: &MapConfig) -> Result<ScanReport> {
    TreeScanner::new(source, config).scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfmap_core::{Data, MemoryFile};

    fn tree() -> MemoryFile {
        MemoryFile::new("scan.nxs")
            .with_group("/entry", Attributes::new().with("NX_class", "NXentry"))
            .with_dataset("/entry/a", vec![1.0, 2.0], Attributes::new())
            .with_group("/entry/inner", Attributes::new())
            .with_dataset("/entry/inner/b", Data::scalar(1.0), Attributes::new())
            .with_dataset("/entry/c", Data::text("x"), Attributes::new())
    }

    #[test]
    fn test_encounter_order() {
        let config = MapConfig::default();
        let report = scan(&tree(), &config).unwrap();
        assert_eq!(
            report.order,
            vec!["/", "/entry", "/entry/a", "/entry/inner", "/entry/inner/b", "/entry/c"]
        );
        assert_eq!(report.groups[1].class_name.as_deref(), Some("NXentry"));
        assert_eq!(
            report.groups[1].child_paths,
            vec!["/entry/a", "/entry/inner", "/entry/c"]
        );
        assert_eq!(report.datasets[1].size, 0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_unreadable_node_is_reported() {
        let file = tree().with_unreadable("/entry/inner");
        let config = MapConfig::default();
        let report = scan(&file, &config).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path, "/entry/inner");
        assert!(report.datasets.iter().any(|d| d.path == "/entry/c"));
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let file = tree().with_unreadable("/");
        let config = MapConfig::default();
        let err = scan(&file, &config).unwrap_err();
        assert!(matches!(err, Error::Scan { .. }));
    }

    #[test]
    fn test_links() {
        let file = tree()
            .with_soft_link("/entry/link_a", "/entry/a")
            .with_soft_link("/entry/missing", "/entry/nothing")
            .with_soft_link("/entry/inner/up", "/entry");
        let config = MapConfig::default();
        let report = scan(&file, &config).unwrap();
        let link = report.datasets.iter().find(|d| d.path == "/entry/link_a").unwrap();
        assert_eq!(link.link_target.as_deref(), Some("/entry/a"));
        let paths: Vec<&str> = report.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"/entry/missing"));
        assert!(paths.contains(&"/entry/inner/up"));
    }

    #[test]
    fn test_depth_guard() {
        let config = MapConfig::default().with_max_depth(1);
        let report = scan(&tree(), &config).unwrap();
        assert!(report.datasets.iter().all(|d| d.path != "/entry/inner/b"));
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_default_entry_only() {
        let file = tree()
            .with_group("/other", Attributes::new())
            .with_dataset("/other/z", vec![1.0], Attributes::new());
        let config = MapConfig::default().with_default_entry_only(true);
        let report = scan(&file, &config).unwrap();
        assert!(report.datasets.iter().all(|d| !d.path.starts_with("/other")));
        assert!(report.groups.iter().any(|g| g.path == "/other"));
    }
}
