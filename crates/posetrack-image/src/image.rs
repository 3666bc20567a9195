use crate::error::ImageError;

/// Image size in pixels
///
/// # Examples
///
/// ```
/// use posetrack_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels covered by this size.
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Axis-aligned rectangular region of interest, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    /// Left column.
    pub x: usize,
    /// Top row.
    pub y: usize,
    /// Width of the region.
    pub width: usize,
    /// Height of the region.
    pub height: usize,
}

impl Rect {
    /// Create a region from its top-left corner and size.
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Size of the region.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// Single channel 8-bit image owning its pixel buffer.
///
/// Pixels are stored row-major. The buffer is released when the image is dropped;
/// borrowed [`ImageView`]s can never outlive it.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    size: ImageSize,
    data: Vec<u8>,
}

impl GrayImage {
    /// Create a new image from pixel data.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use posetrack_image::{GrayImage, ImageSize};
    ///
    /// let image = GrayImage::new(
    ///     ImageSize { width: 10, height: 20 },
    ///     vec![0u8; 10 * 20],
    /// ).unwrap();
    ///
    /// assert_eq!(image.width(), 10);
    /// assert_eq!(image.height(), 20);
    /// ```
    pub fn new(size: ImageSize, data: Vec<u8>) -> Result<Self, ImageError> {
        if size.width == 0 || size.height == 0 {
            return Err(ImageError::EmptyImage(size.width, size.height));
        }
        if data.len() != size.area() {
            return Err(ImageError::InvalidDataLength(data.len(), size.area()));
        }
        Ok(Self { size, data })
    }

    /// Create a new image with every pixel set to `val`.
    pub fn from_size_val(size: ImageSize, val: u8) -> Result<Self, ImageError> {
        Self::new(size, vec![val; size.area()])
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Raw row-major pixel data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw row-major pixel data.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel value at column `x`, row `y`, or `None` outside the image.
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some(self.data[y * self.size.width + x])
    }

    /// Set the pixel at column `x`, row `y`. Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, val: u8) {
        if x < self.size.width && y < self.size.height {
            self.data[y * self.size.width + x] = val;
        }
    }

    /// View covering the whole image.
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            parent: self,
            roi: Rect::new(0, 0, self.size.width, self.size.height),
        }
    }

    /// View of a sub-region of the image.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::RegionOutOfBounds`] if the region does not fit the image
    /// and [`ImageError::EmptyImage`] if it has no pixels.
    pub fn roi(&self, roi: Rect) -> Result<ImageView<'_>, ImageError> {
        if roi.width == 0 || roi.height == 0 {
            return Err(ImageError::EmptyImage(roi.width, roi.height));
        }
        if roi.x + roi.width > self.size.width || roi.y + roi.height > self.size.height {
            return Err(ImageError::RegionOutOfBounds {
                x: roi.x,
                y: roi.y,
                width: roi.width,
                height: roi.height,
                parent_width: self.size.width,
                parent_height: self.size.height,
            });
        }
        Ok(ImageView { parent: self, roi })
    }
}

/// Borrowed read-only view of a rectangular region of a [`GrayImage`].
///
/// Coordinates passed to the view are relative to the region's top-left corner.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    parent: &'a GrayImage,
    roi: Rect,
}

impl<'a> ImageView<'a> {
    /// Size of the viewed region.
    pub fn size(&self) -> ImageSize {
        self.roi.size()
    }

    /// Width of the viewed region.
    pub fn width(&self) -> usize {
        self.roi.width
    }

    /// Height of the viewed region.
    pub fn height(&self) -> usize {
        self.roi.height
    }

    /// Region of the parent covered by this view.
    pub fn region(&self) -> Rect {
        self.roi
    }

    /// Pixel value at view coordinates, or `None` outside the view.
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.roi.width || y >= self.roi.height {
            return None;
        }
        self.parent.get(self.roi.x + x, self.roi.y + y)
    }

    /// One row of the view as a contiguous slice.
    pub fn row(&self, y: usize) -> Option<&'a [u8]> {
        if y >= self.roi.height {
            return None;
        }
        let start = (self.roi.y + y) * self.parent.width() + self.roi.x;
        self.parent.as_slice().get(start..start + self.roi.width)
    }

    /// Copy the viewed pixels into a new owned image.
    pub fn to_image(&self) -> GrayImage {
        let mut data = Vec::with_capacity(self.roi.width * self.roi.height);
        for y in 0..self.roi.height {
            if let Some(row) = self.row(y) {
                data.extend_from_slice(row);
            }
        }
        GrayImage {
            size: self.roi.size(),
            data,
        }
    }
}
