//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error while opening a container.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Failure while processing one file of a batch.
    #[error("{path}: {source}")]
    InFile {
        path: String,
        #[source]
        source: hdfmap_core::Error,
    },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] hdfmap_core::Error),
}

impl Error {
    /// Attaches the file a core error came from.
    #[must_use]
    pub fn in_file(path: &str, source: hdfmap_core::Error) -> Self {
        Self::InFile {
            path: path.to_string(),
            source,
        }
    }
}
