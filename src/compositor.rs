//! Watermark compositing.
//!
//! A watermark is shrunk to fit inside `target / ratio` (thumbnail semantics,
//! aspect ratio preserved, never upscaled) and then pasted onto the target
//! using its own alpha channel as the mask:
//! `out = (alpha * watermark + (255 - alpha) * target) / 255`

use image::imageops::{self, FilterType};
use image::{RgbImage, RgbaImage};

use crate::error::{Error, Result};

/// Bicubic-class filter used when shrinking watermarks.
pub const RESAMPLING_FILTER: FilterType = FilterType::CatmullRom;

/// Options controlling where and how large the watermark is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeOptions {
    /// The watermark must fit within `target_dimension / ratio`.
    pub ratio: u32,
    /// Top-left corner of the pasted watermark, shared by every datapoint.
    pub origin: (u32, u32),
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            ratio: 2,
            origin: (0, 0),
        }
    }
}

/// Bounding box a watermark must fit in for a target of the given size.
///
/// # Errors
///
/// Returns [`Error::InvalidRatio`] for a zero ratio and
/// [`Error::ImageTooSmall`] when either bound would be zero pixels.
pub fn thumbnail_bounds(target_width: u32, target_height: u32, ratio: u32) -> Result<(u32, u32)> {
    if ratio == 0 {
        return Err(Error::InvalidRatio);
    }
    let bounds = (target_width / ratio, target_height / ratio);
    if bounds.0 == 0 || bounds.1 == 0 {
        return Err(Error::ImageTooSmall {
            width: target_width,
            height: target_height,
            ratio,
        });
    }
    Ok(bounds)
}

/// Size an image of `width` x `height` takes when thumbnailed into `bounds`.
///
/// The box is first clamped to the source size so nothing is ever upscaled.
/// The constraining edge is kept and the other edge is whichever of the
/// floor/ceil of its exact value best preserves the aspect ratio, at least 1.
#[must_use]
pub fn thumbnail_size(width: u32, height: u32, bounds: (u32, u32)) -> (u32, u32) {
    let mut x = bounds.0.min(width);
    let mut y = bounds.1.min(height);
    if (x, y) == (width, height) || x == 0 || y == 0 {
        return (x, y);
    }

    let aspect = f64::from(width) / f64::from(height);
    let (fx, fy) = (f64::from(x), f64::from(y));
    if fx / fy >= aspect {
        x = round_aspect(fy * aspect, |n| (aspect - n / fy).abs());
    } else {
        y = round_aspect(fx / aspect, |n| {
            if n == 0.0 {
                0.0
            } else {
                (aspect - fx / n).abs()
            }
        });
    }
    (x, y)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_aspect(number: f64, key: impl Fn(f64) -> f64) -> u32 {
    let lo = number.floor();
    let hi = number.ceil();
    let best = if key(hi) < key(lo) { hi } else { lo };
    (best as u32).max(1)
}

/// Shrink a watermark to fit within `bounds`, preserving its aspect ratio.
///
/// Returns a copy when the watermark already fits.
#[must_use]
pub fn fit_watermark(watermark: &RgbaImage, bounds: (u32, u32)) -> RgbaImage {
    let (w, h) = thumbnail_size(watermark.width(), watermark.height(), bounds);
    if (w, h) == watermark.dimensions() {
        return watermark.clone();
    }
    imageops::resize(watermark, w, h, RESAMPLING_FILTER)
}

/// Paste `watermark` onto `target` at `origin`, masked by the watermark's alpha.
///
/// Pixels where alpha is zero are left untouched. The watermark is clipped
/// to the target's bounds.
pub fn composite(target: &mut RgbImage, watermark: &RgbaImage, origin: (u32, u32)) {
    let (pos_x, pos_y) = origin;

    // Clip to image bounds
    let x2 = pos_x.saturating_add(watermark.width()).min(target.width());
    let y2 = pos_y.saturating_add(watermark.height()).min(target.height());

    if pos_x >= x2 || pos_y >= y2 {
        return;
    }

    for dy in 0..(y2 - pos_y) {
        for dx in 0..(x2 - pos_x) {
            let wm = watermark.get_pixel(dx, dy);
            let alpha = u32::from(wm[3]);
            if alpha == 0 {
                continue;
            }

            let px = target.get_pixel_mut(pos_x + dx, pos_y + dy);
            for ch in 0..3 {
                let blended =
                    (u32::from(wm[ch]) * alpha + u32::from(px[ch]) * (255 - alpha) + 127) / 255;
                #[allow(clippy::cast_possible_truncation)]
                {
                    px[ch] = blended as u8;
                }
            }
        }
    }
}

/// Resize `watermark` for `target` and composite it in place.
///
/// The caller's watermark is not modified. Clone the target first if the
/// unmarked image is still needed.
///
/// # Errors
///
/// Fails if the ratio is zero or the target is too small to hold a watermark.
pub fn apply_watermark(
    watermark: &RgbaImage,
    target: &mut RgbImage,
    opts: &CompositeOptions,
) -> Result<()> {
    let bounds = thumbnail_bounds(target.width(), target.height(), opts.ratio)?;
    let fitted = fit_watermark(watermark, bounds);
    composite(target, &fitted, opts.origin);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    fn solid_target(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([10, 120, 200]))
    }

    #[test]
    fn bounds_divide_target_dimensions() {
        assert_eq!(thumbnail_bounds(100, 80, 2).unwrap(), (50, 40));
        assert_eq!(thumbnail_bounds(101, 81, 2).unwrap(), (50, 40));
        assert_eq!(thumbnail_bounds(90, 90, 3).unwrap(), (30, 30));
        assert!(matches!(thumbnail_bounds(10, 10, 0), Err(Error::InvalidRatio)));
        assert!(matches!(
            thumbnail_bounds(1, 10, 2),
            Err(Error::ImageTooSmall { width: 1, .. })
        ));
    }

    #[test]
    fn thumbnail_fits_bounds_and_keeps_aspect() {
        for &(w, h) in &[(60, 60), (200, 50), (37, 91), (640, 480), (7, 300)] {
            for &(tw, th) in &[(100, 100), (33, 77), (500, 20), (1920, 1080)] {
                for ratio in 1..=4 {
                    let Ok(bounds) = thumbnail_bounds(tw, th, ratio) else {
                        continue;
                    };
                    let (nw, nh) = thumbnail_size(w, h, bounds);
                    assert!(nw <= bounds.0 && nh <= bounds.1, "{w}x{h} -> {nw}x{nh} in {bounds:?}");
                    assert!(nw >= 1 && nh >= 1);
                    assert!(nw <= w && nh <= h, "never upscale");

                    // One pixel of rounding on the derived edge at most.
                    let expect_h = f64::from(nw) * f64::from(h) / f64::from(w);
                    let expect_w = f64::from(nh) * f64::from(w) / f64::from(h);
                    assert!(
                        (f64::from(nh) - expect_h).abs() <= 1.0
                            || (f64::from(nw) - expect_w).abs() <= 1.0,
                        "{w}x{h} -> {nw}x{nh}"
                    );
                }
            }
        }
    }

    #[test]
    fn thumbnail_is_noop_when_already_small() {
        assert_eq!(thumbnail_size(20, 10, (50, 50)), (20, 10));
        let wm = RgbaImage::from_pixel(20, 10, Rgba([1, 2, 3, 4]));
        assert_eq!(fit_watermark(&wm, (50, 50)), wm);
    }

    #[test]
    fn thumbnail_uses_constraining_edge() {
        assert_eq!(thumbnail_size(60, 60, (50, 50)), (50, 50));
        assert_eq!(thumbnail_size(200, 100, (50, 50)), (50, 25));
        assert_eq!(thumbnail_size(100, 200, (50, 50)), (25, 50));
    }

    #[test]
    fn transparent_pixels_leave_target_unchanged() {
        let mut target = solid_target(40, 40);
        let original = target.clone();
        let mut wm = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 0]));
        for x in 0..10 {
            wm.put_pixel(x, 0, Rgba([255, 0, 0, 128]));
        }

        composite(&mut target, &wm, (0, 0));

        for (x, y, px) in target.enumerate_pixels() {
            if y == 0 && x < 10 {
                assert_ne!(px, original.get_pixel(x, y));
            } else {
                assert_eq!(px, original.get_pixel(x, y), "pixel ({x},{y}) changed");
            }
        }
    }

    #[test]
    fn opaque_pixels_take_watermark_colour() {
        let mut target = solid_target(10, 10);
        let wm = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        composite(&mut target, &wm, (2, 3));
        assert_eq!(*target.get_pixel(2, 3), Rgb([1, 2, 3]));
        assert_eq!(*target.get_pixel(5, 6), Rgb([1, 2, 3]));
        assert_eq!(*target.get_pixel(6, 6), Rgb([10, 120, 200]));
        assert_eq!(*target.get_pixel(1, 3), Rgb([10, 120, 200]));
    }

    #[test]
    fn composite_clips_to_target() {
        let mut target = solid_target(10, 10);
        let wm = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        composite(&mut target, &wm, (6, 6));
        assert_eq!(*target.get_pixel(9, 9), Rgb([0, 0, 0]));
        assert_eq!(*target.get_pixel(5, 5), Rgb([10, 120, 200]));

        // Entirely off-canvas is a no-op.
        let before = target.clone();
        composite(&mut target, &wm, (10, 0));
        assert_eq!(target, before);
    }

    #[test]
    fn half_size_watermark_stays_in_top_left() {
        let mut target = solid_target(100, 100);
        let original = target.clone();
        let wm = RgbaImage::from_pixel(60, 60, Rgba([255, 0, 255, 255]));

        apply_watermark(&wm, &mut target, &CompositeOptions::default()).unwrap();

        assert_eq!(wm.dimensions(), (60, 60), "caller's watermark untouched");
        for (x, y, px) in target.enumerate_pixels() {
            if x < 50 && y < 50 {
                assert_eq!(*px, Rgb([255, 0, 255]));
            } else {
                assert_eq!(px, original.get_pixel(x, y));
            }
        }
    }
}
