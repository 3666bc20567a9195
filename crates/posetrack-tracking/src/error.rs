use posetrack_image::ImageError;

/// An error type for reading and writing reference repositories.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    /// Error from the underlying reader or writer.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The data ended before a complete record was read.
    #[error("Unexpected end of repository data while reading {0}")]
    UnexpectedEof(&'static str),

    /// A numeric field could not be parsed or is out of range.
    #[error("Invalid value {value:?} for {field}")]
    InvalidValue {
        /// Name of the field being read.
        field: &'static str,
        /// Offending token.
        value: String,
    },

    /// A descriptor has a different dimension than the first one of the repository.
    #[error("Descriptor dimension {actual} differs from the repository dimension {expected}")]
    DescriptorDimension {
        /// Dimension of the first descriptor.
        expected: usize,
        /// Dimension found.
        actual: usize,
    },
}

/// An error type for the tracking crate.
#[derive(thiserror::Error, Debug)]
pub enum TrackingError {
    /// Error from the image crate.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error from repository persistence.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Error when parsing a JSON configuration.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error from reading a configuration file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error when a configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error when the physical size of a target is not positive.
    #[error("Invalid physical target size {0}x{1}")]
    InvalidPhysicalSize(f64, f64),

    /// Error when registration found no usable features.
    #[error("No features detected on the reference image")]
    EmptyReference,

    /// Error when a target index is out of range.
    #[error("Target index {0} is out of range ({1} targets)")]
    UnknownTarget(usize, usize),
}
