//! hdfmap-eval: Expressions and format templates over an [`HdfMap`].
//!
//! ```text
//! "(sum|total) / mon?(1)"   -> symbols: (sum|total), mon?(1)
//!                           -> "__sym0__ / __sym1__"
//!                           -> parsed and evaluated, reading only what is used
//! ```
//!
//! Names resolve through named expressions, local values, region-of-interest
//! reductions and finally the combined namespace of the map.
//!
//! [`HdfMap`]: hdfmap_namespace::HdfMap

pub mod engine;
pub mod expr;
pub mod format;
pub mod functions;
pub mod readers;
pub mod roi;
pub mod token;

pub use engine::{Evaluator, MapEval};
pub use format::{format_value, parse_template, FormatSpec, Piece};
pub use readers::MapReaders;
pub use roi::{background_window, roi_window, RoiWindow};
pub use token::{NameRef, RefKind, Segment, Token};
