//! basin-export: Pure serializers for segmentation output (sans-IO)
//!
//! Encodes label slices as PNG or TIFF images, names them after the run
//! parameters, and renders the run metadata sidecar as JSON. Nothing
//! here touches the filesystem; `basin-io` writes the bytes.

pub mod error;
pub mod metadata;
pub mod naming;
pub mod slice;

pub use error::ExportError;
pub use metadata::{METADATA_FILENAME, RunMetadata, to_metadata_json};
pub use naming::{SliceNaming, slice_filename};
pub use slice::{LabelEncoding, SliceFormat, decode_packed_rgba, encode_slice, pack_label};
