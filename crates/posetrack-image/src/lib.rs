#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the image module.
pub mod error;

/// Grayscale image buffer and borrowed views.
pub mod image;

/// Image resizing used to build reference pyramids.
pub mod resize;

pub use crate::error::ImageError;
pub use crate::image::{GrayImage, ImageSize, ImageView, Rect};
pub use crate::resize::{downscale_bilinear, scale_pyramid};
