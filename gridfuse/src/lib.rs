//! Align, merge, and store collections of chunked n-dimensional arrays.
//!
//! A [`Dataset`] is a set of named cubes dimensioned by named, value-carrying axes.
//! [`merge`] combines datasets by inferring, from their axis values, how they line up,
//! producing lazy views that read no data until asked. The [`store`] module persists
//! datasets to chunked stores and opens them again as lazy datasets.
//!
pub mod axis;
pub mod buffer;
pub mod chunks;
pub mod concat;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod geom;
pub mod join;
pub mod merge;
pub mod offsets;
pub mod source;
pub mod store;
pub mod testing;

pub use axis::{AxisKind, AxisValues, FloatRange, IntRange};
pub use buffer::{ArrayBuffer, ArrayData, Encoding};
pub use chunks::ChunkGeometry;
pub use concat::ConcatArray;
pub use config::Config;
pub use dataset::{Attrs, Axis, Cube, Dataset};
pub use errors::{Error, Result};
pub use geom::Window;
pub use join::AxisJoin;
pub use merge::{merge, stack};
pub use offsets::DeclaredOffsets;
pub use source::{ArraySource, ExpandDims, SliceSource, Source};
pub use store::{
    add_cubes, append, open_dataset, persist, persist_with, AxisSegment, AxisSpec, CubeSpec,
    Layout, LayoutWriter, Store,
};
