//! hdfmap-namespace: Namespace construction for hierarchical containers.
//!
//! Building an [`HdfMap`] is a pipeline of pure stages:
//! - **Scan**: one recursive walk producing flat group and dataset records
//! - **Names**: short, expression-safe names per size category
//! - **Conventions**: default signal/axes, default image and scan length
//!
//! The resulting map is reusable across files sharing the same layout.

pub mod config;
pub mod conventions;
pub mod names;
pub mod namespace;
pub mod scanner;

pub use config::MapConfig;
pub use conventions::{class_index, most_common_shape, most_common_size, Conventions};
pub use names::{build_names, short_name, NameTables};
pub use namespace::{HdfMap, LocalPriority, RoiDefinition, SearchTarget};
pub use scanner::{scan, ScanIssue, ScanReport, TreeScanner};
