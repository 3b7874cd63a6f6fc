//! Lazy dataset handles.

use std::fmt;
use std::sync::Arc;

use crate::{Attributes, Data, DataSource, Result, Selection};

/// Handle to a dataset that reads on demand.
///
/// The handle shares ownership of its source, so the backing container
/// stays open for as long as the handle lives and is released on drop.
#[derive(Clone)]
pub struct LazyDataset {
    source: Arc<dyn DataSource>,
    path: String,
    shape: Vec<usize>,
    attributes: Attributes,
}

impl LazyDataset {
    /// Opens a handle on `path`, reading only its metadata.
    ///
    /// # Errors
    /// Returns an error if the node is missing.
    pub fn open(source: Arc<dyn DataSource>, path: &str) -> Result<Self> {
        let info = source.info(path)?;
        Ok(Self {
            source,
            path: path.to_string(),
            shape: info.shape,
            attributes: info.attributes,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Container file path this handle reads from.
    #[must_use]
    pub fn filepath(&self) -> &str {
        self.source.filepath()
    }

    /// Reads the selected region only.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    pub fn read(&self, selection: &Selection) -> Result<Data> {
        self.source.read(&self.path, selection)
    }

    /// Reads the whole dataset.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    pub fn read_all(&self) -> Result<Data> {
        self.read(&Selection::all())
    }
}

impl fmt::Debug for LazyDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDataset")
            .field("file", &self.source.filepath())
            .field("path", &self.path)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl PartialEq for LazyDataset {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.source.filepath() == other.source.filepath()
    }
}
