#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use posetrack_image as image;

#[doc(inline)]
pub use posetrack_geometry as geometry;

#[doc(inline)]
pub use posetrack_tracking as tracking;
