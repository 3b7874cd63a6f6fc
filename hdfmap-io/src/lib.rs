//! hdfmap-io: HDF5 reader, file loader and batch helpers for hdfmap.
//!
//! The HDF5 adapter is behind the `hdf5` feature; the loader and batch
//! helpers work with any [`hdfmap_core::DataSource`] opener.

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod batch;
mod loader;

pub use batch::{
    create_map, list_files, multi_data_block, multi_eval, multi_format, multi_get_data,
    multi_get_image, DataBlock, Opener, EXTENSIONS,
};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{open_source, Hdf5Source};
pub use loader::{FileLoader, PlotData};
