//! Export error type.

/// Errors that can occur while serializing segmentation output.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A label does not fit the chosen encoding.
    #[error("label {label} in slice {z} exceeds the {max} maximum of the {encoding} encoding")]
    LabelOverflow {
        /// The offending label.
        label: u32,
        /// Slice index.
        z: u32,
        /// Largest encodable label.
        max: u32,
        /// Encoding name.
        encoding: &'static str,
    },

    /// The requested slice does not exist.
    #[error("slice {z} is out of range for a volume of {size_z} slices")]
    SliceOutOfRange {
        /// Requested slice index.
        z: u32,
        /// Number of slices in the volume.
        size_z: u32,
    },

    /// Image encoding failed.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// TIFF encoding failed.
    #[error("tiff encoding failed: {0}")]
    TiffEncode(#[from] tiff::TiffError),

    /// The encoding cannot be stored in the chosen container.
    #[error("the {encoding} encoding cannot be written as {format}")]
    UnsupportedFormat {
        /// Encoding name.
        encoding: &'static str,
        /// Container extension.
        format: &'static str,
    },

    /// Metadata serialization failed.
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),

    /// An encoding or format name was not recognized.
    #[error("unknown {kind} '{value}'")]
    UnknownOption {
        /// What was being parsed.
        kind: &'static str,
        /// The unrecognized text.
        value: String,
    },
}
