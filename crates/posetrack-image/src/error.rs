/// An error type for the image crate.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when the data length does not match the image size.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidDataLength(usize, usize),

    /// Error when a region of interest does not fit inside its parent image.
    #[error("Region {x},{y} {width}x{height} is outside of the {parent_width}x{parent_height} image")]
    RegionOutOfBounds {
        /// Left column of the region.
        x: usize,
        /// Top row of the region.
        y: usize,
        /// Region width.
        width: usize,
        /// Region height.
        height: usize,
        /// Width of the parent image.
        parent_width: usize,
        /// Height of the parent image.
        parent_height: usize,
    },

    /// Error when an image or a requested size has no pixels.
    #[error("Image size must be non-zero, got {0}x{1}")]
    EmptyImage(usize, usize),

    /// Error when a scale factor is outside of (0, 1].
    #[error("Invalid scale factor {0}, expected a value in (0, 1]")]
    InvalidScale(f64),
}
