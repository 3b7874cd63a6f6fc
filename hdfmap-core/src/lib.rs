//! hdfmap-core: Core data model and reader interface for hdfmap.
//!
//! This crate provides the types shared by the namespace builder and the
//! expression engine:
//!
//! - Scan records ([`GroupRecord`], [`DatasetRecord`]) and attribute values
//! - The [`DataSource`] trait implemented by container readers
//! - [`Selection`] for full, single-index and sliced reads
//! - [`Value`] and the owning [`LazyDataset`] handle
//! - [`MemoryFile`], an in-memory container

pub mod data;
pub mod error;
pub mod lazy;
pub mod memory;
pub mod model;
pub mod selection;
pub mod source;
pub mod text;
pub mod value;

pub use data::Data;
pub use error::{Error, Result};
pub use lazy::LazyDataset;
pub use memory::MemoryFile;
pub use model::{
    join_path, leaf_name, parent_path, shape_size, AttrValue, Attributes, ChildLink,
    DatasetRecord, DtypeClass, GroupRecord, LinkKind, NodeInfo, NodeKind, SEP,
};
pub use selection::{AxisSelection, SelectItem, Selection, SliceSpec};
pub use source::DataSource;
pub use text::{expression_safe_name, is_identifier, round_string_floats};
pub use value::Value;
