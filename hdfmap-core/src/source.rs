//! Reader interface consumed from the external hierarchical-file reader.

use crate::{ChildLink, Data, NodeInfo, Result, Selection};

/// A readable, already-open hierarchical container.
///
/// Implementations own chunking, compression and link following. Every
/// method is a blocking read; nothing here mutates the container.
pub trait DataSource: Send + Sync {
    /// Identifier the container was opened from (usually a file path).
    fn filepath(&self) -> &str;

    /// Children of the group at `path`, in declaration order.
    ///
    /// # Errors
    /// Returns an error if the group cannot be read.
    fn list(&self, path: &str) -> Result<Vec<ChildLink>>;

    /// Metadata of the node at `path`, following links.
    ///
    /// # Errors
    /// Returns an error if the node is missing or unreadable.
    fn info(&self, path: &str) -> Result<NodeInfo>;

    /// Reads the selected part of the dataset at `path`.
    ///
    /// # Errors
    /// Returns an error if the dataset is missing, unreadable, or the
    /// selection does not fit its shape.
    fn read(&self, path: &str, selection: &Selection) -> Result<Data>;

    /// Whether a node exists at `path`.
    fn contains(&self, path: &str) -> bool {
        self.info(path).is_ok()
    }

    /// File name component of [`DataSource::filepath`].
    fn filename(&self) -> &str {
        let path = self.filepath();
        path.rsplit(['/', '\\']).next().unwrap_or(path)
    }
}
