//! In-memory container implementing [`DataSource`].
//!
//! Useful as a fixture and for trees assembled at runtime. Groups, datasets,
//! attributes, soft and external links, and unreadable nodes can be modeled.
//! Dataset reads are counted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    join_path, leaf_name, parent_path, Attributes, ChildLink, Data, DataSource, DtypeClass, Error,
    LinkKind, NodeInfo, NodeKind, Result, Selection, SEP,
};

const MAX_LINK_HOPS: usize = 16;

#[derive(Debug, Clone)]
enum MemNode {
    Group {
        attributes: Attributes,
        children: Vec<ChildLink>,
    },
    Dataset {
        attributes: Attributes,
        data: Data,
    },
}

/// Hierarchical container held entirely in memory.
#[derive(Debug)]
pub struct MemoryFile {
    filepath: String,
    nodes: BTreeMap<String, MemNode>,
    unreadable: HashSet<String>,
    externals: HashMap<String, Arc<MemoryFile>>,
    reads: AtomicUsize,
    read_log: Mutex<Vec<String>>,
}

impl MemoryFile {
    /// Creates a container holding only the root group.
    #[must_use]
    pub fn new(filepath: impl Into<String>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MemNode::Group {
                attributes: Attributes::new(),
                children: Vec::new(),
            },
        );
        Self {
            filepath: filepath.into(),
            nodes,
            unreadable: HashSet::new(),
            externals: HashMap::new(),
            reads: AtomicUsize::new(0),
            read_log: Mutex::new(Vec::new()),
        }
    }

    /// Adds a group, creating missing parents. Re-adding merges attributes.
    #[must_use]
    pub fn with_group(mut self, path: &str, attributes: Attributes) -> Self {
        let path = normalize(path);
        self.ensure_group(&path);
        if let Some(MemNode::Group {
            attributes: existing,
            ..
        }) = self.nodes.get_mut(&path)
        {
            for (name, value) in attributes.iter() {
                existing.insert(name, value.clone());
            }
        }
        self
    }

    /// Adds a dataset, creating missing parent groups.
    #[must_use]
    pub fn with_dataset(
        mut self,
        path: &str,
        data: impl Into<Data>,
        attributes: Attributes,
    ) -> Self {
        let path = normalize(path);
        self.attach(&path, LinkKind::Hard);
        self.nodes.insert(
            path,
            MemNode::Dataset {
                attributes,
                data: data.into(),
            },
        );
        self
    }

    /// Adds a soft link at `path` pointing to `target` in this container.
    #[must_use]
    pub fn with_soft_link(mut self, path: &str, target: &str) -> Self {
        let path = normalize(path);
        self.attach(
            &path,
            LinkKind::Soft {
                target: normalize(target),
            },
        );
        self
    }

    /// Adds an external link at `path` into `file` at `target`.
    #[must_use]
    pub fn with_external_link(mut self, path: &str, file: &str, target: &str) -> Self {
        let path = normalize(path);
        self.attach(
            &path,
            LinkKind::External {
                file: file.to_string(),
                target: normalize(target),
            },
        );
        self
    }

    /// Registers another container so external links into it resolve.
    #[must_use]
    pub fn with_external_file(mut self, file: MemoryFile) -> Self {
        self.externals
            .insert(file.filepath.clone(), Arc::new(file));
        self
    }

    /// Makes every access to `path` fail with a source error.
    #[must_use]
    pub fn with_unreadable(mut self, path: &str) -> Self {
        self.unreadable.insert(normalize(path));
        self
    }

    /// Number of dataset reads served so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Paths read so far, in order.
    #[must_use]
    pub fn read_paths(&self) -> Vec<String> {
        self.read_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Resets the read counter and log.
    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::Relaxed);
        if let Ok(mut log) = self.read_log.lock() {
            log.clear();
        }
    }

    fn ensure_group(&mut self, path: &str) {
        if self.nodes.contains_key(path) {
            return;
        }
        self.attach(path, LinkKind::Hard);
        self.nodes.insert(
            path.to_string(),
            MemNode::Group {
                attributes: Attributes::new(),
                children: Vec::new(),
            },
        );
    }

    fn attach(&mut self, path: &str, link: LinkKind) {
        let parent = parent_path(path).to_string();
        self.ensure_group(&parent);
        let name = leaf_name(path).to_string();
        if let Some(MemNode::Group { children, .. }) = self.nodes.get_mut(&parent) {
            if let Some(existing) = children.iter_mut().find(|c| c.name == name) {
                existing.link = link;
            } else {
                children.push(ChildLink { name, link });
            }
        }
    }

    /// Follows links segment by segment to the node `path` refers to.
    fn locate(&self, path: &str, hops: usize) -> Result<(&MemoryFile, String)> {
        if hops > MAX_LINK_HOPS {
            return Err(Error::Source(format!("link loop while resolving '{path}'")));
        }
        let path = normalize(path);
        let mut file = self;
        let mut current = "/".to_string();
        for segment in path.split(SEP).filter(|s| !s.is_empty()) {
            let Some(MemNode::Group { children, .. }) = file.nodes.get(&current) else {
                return Err(Error::NotFound(path.clone()));
            };
            let Some(child) = children.iter().find(|c| c.name == segment) else {
                return Err(Error::NotFound(path.clone()));
            };
            match &child.link {
                LinkKind::Hard => current = join_path(&current, segment),
                LinkKind::Soft { target } => {
                    let (f, resolved) = file.locate(target, hops + 1)?;
                    file = f;
                    current = resolved;
                }
                LinkKind::External {
                    file: name,
                    target,
                } => {
                    let external = file.externals.get(name).ok_or_else(|| {
                        Error::Source(format!("external file '{name}' is not available"))
                    })?;
                    let (f, resolved) = external.locate(target, hops + 1)?;
                    file = f;
                    current = resolved;
                }
            }
        }
        if file.unreadable.contains(&current) {
            return Err(Error::Source(format!("unable to read '{current}'")));
        }
        Ok((file, current))
    }

    fn node(&self, path: &str) -> Result<&MemNode> {
        if self.unreadable.contains(&normalize(path)) {
            return Err(Error::Source(format!("unable to read '{path}'")));
        }
        let (file, resolved) = self.locate(path, 0)?;
        file.nodes
            .get(&resolved)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

impl DataSource for MemoryFile {
    fn filepath(&self) -> &str {
        &self.filepath
    }

    fn list(&self, path: &str) -> Result<Vec<ChildLink>> {
        match self.node(path)? {
            MemNode::Group { children, .. } => Ok(children.clone()),
            MemNode::Dataset { .. } => Err(Error::Source(format!("'{path}' is not a group"))),
        }
    }

    fn info(&self, path: &str) -> Result<NodeInfo> {
        Ok(match self.node(path)? {
            MemNode::Group { attributes, .. } => NodeInfo {
                kind: NodeKind::Group,
                attributes: attributes.clone(),
                shape: Vec::new(),
                dtype: DtypeClass::Numeric,
            },
            MemNode::Dataset { attributes, data } => NodeInfo {
                kind: NodeKind::Dataset,
                attributes: attributes.clone(),
                shape: data.shape().to_vec(),
                dtype: match data {
                    Data::Text(_) => DtypeClass::String,
                    _ => DtypeClass::Numeric,
                },
            },
        })
    }

    fn read(&self, path: &str, selection: &Selection) -> Result<Data> {
        match self.node(path)? {
            MemNode::Dataset { data, .. } => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut log) = self.read_log.lock() {
                    log.push(path.to_string());
                }
                data.select(selection)
            }
            MemNode::Group { .. } => Err(Error::Source(format!("'{path}' is not a dataset"))),
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEP);
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with(SEP) {
        trimmed.to_string()
    } else {
        format!("{SEP}{trimmed}")
    }
}
