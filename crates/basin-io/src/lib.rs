//! basin-io: Filesystem I/O for the basin segmentation pipeline.
//!
//! Reads three directories of per-z affinity slices (one directory per
//! axis channel) into an [`AffinityGraph`](basin_pipeline::AffinityGraph),
//! and writes label slices plus the run metadata sidecar. All decoding
//! and encoding goes through the `image` crate; the pure serializers
//! live in `basin-export`.

pub mod error;
pub mod reader;
pub mod slices;
pub mod writer;

pub use error::{IoError, IoResult};
pub use reader::{AffinityDirs, ReadOptions, read_affinity_graph};
pub use slices::list_slice_files;
pub use writer::{write_metadata, write_segmentation};
