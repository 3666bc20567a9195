use crate::error::ImageError;
use crate::image::{GrayImage, ImageSize, ImageView};

/// Kernel for bilinear interpolation on a view.
///
/// `u` and `v` must lie inside the view; samples past the last column/row are clamped.
fn bilinear_interpolation(src: &ImageView<'_>, u: f64, v: f64) -> f64 {
    let (rows, cols) = (src.height(), src.width());

    let iu0 = (u.trunc() as usize).min(cols - 1);
    let iv0 = (v.trunc() as usize).min(rows - 1);
    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let frac_u = u.fract();
    let frac_v = v.fract();
    let frac_uu = 1.0 - frac_u;
    let frac_vv = 1.0 - frac_v;

    let px = |x: usize, y: usize| src.get(x, y).unwrap_or(0) as f64;

    px(iu0, iv0) * frac_uu * frac_vv
        + px(iu1, iv0) * frac_u * frac_vv
        + px(iu0, iv1) * frac_uu * frac_v
        + px(iu1, iv1) * frac_u * frac_v
}

/// Downscale a view by `scale` using bilinear interpolation.
///
/// The output size is `round(width * scale) x round(height * scale)`, at least one pixel.
///
/// # Errors
///
/// Returns [`ImageError::InvalidScale`] if `scale` is not in `(0, 1]`.
///
/// # Example
///
/// ```
/// use posetrack_image::{downscale_bilinear, GrayImage, ImageSize};
///
/// let image = GrayImage::from_size_val(ImageSize { width: 8, height: 4 }, 10).unwrap();
/// let small = downscale_bilinear(&image.view(), 0.5).unwrap();
///
/// assert_eq!(small.size(), ImageSize { width: 4, height: 2 });
/// assert_eq!(small.get(1, 1), Some(10));
/// ```
pub fn downscale_bilinear(src: &ImageView<'_>, scale: f64) -> Result<GrayImage, ImageError> {
    if !(scale > 0.0 && scale <= 1.0) {
        return Err(ImageError::InvalidScale(scale));
    }

    let dst_size = ImageSize {
        width: ((src.width() as f64 * scale).round() as usize).max(1),
        height: ((src.height() as f64 * scale).round() as usize).max(1),
    };

    // map pixel centres of the destination back into the source
    let sx = src.width() as f64 / dst_size.width as f64;
    let sy = src.height() as f64 / dst_size.height as f64;

    let mut data = Vec::with_capacity(dst_size.area());
    for y in 0..dst_size.height {
        let v = ((y as f64 + 0.5) * sy - 0.5).clamp(0.0, (src.height() - 1) as f64);
        for x in 0..dst_size.width {
            let u = ((x as f64 + 0.5) * sx - 0.5).clamp(0.0, (src.width() - 1) as f64);
            let val = bilinear_interpolation(src, u, v);
            data.push(val.round().clamp(0.0, 255.0) as u8);
        }
    }

    GrayImage::new(dst_size, data)
}

/// Build a scale pyramid of `steps` levels, level `i` downscaled by `factor^i`.
///
/// Returns `(scale, image)` pairs; level 0 is a copy of the input at scale 1.
pub fn scale_pyramid(
    src: &ImageView<'_>,
    factor: f64,
    steps: usize,
) -> Result<Vec<(f64, GrayImage)>, ImageError> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(ImageError::InvalidScale(factor));
    }

    let mut levels = Vec::with_capacity(steps);
    let mut scale = 1.0;
    for _ in 0..steps {
        let level = if scale == 1.0 {
            src.to_image()
        } else {
            downscale_bilinear(src, scale)?
        };
        levels.push((scale, level));
        scale *= factor;
    }
    Ok(levels)
}
