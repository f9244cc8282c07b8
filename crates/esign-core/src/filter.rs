//! Signature background removal
//!
//! A signature usually arrives as a phone photo or scan: dark ink on light
//! paper, no alpha channel. [`transparentize`] derives an alpha mask from the
//! inverted luminance so paper becomes transparent and ink stays opaque, with
//! soft stroke edges kept intact.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Rgba, RgbImage, RgbaImage};
use imageproc::filter::median_filter;

use crate::error::FilterError;

/// Exponent applied to the inverted luminance
pub const ALPHA_GAMMA: f32 = 1.7;

/// Linear contrast `(multiplier, offset)` applied to the alpha mask
const ALPHA_CONTRAST: (f32, f32) = (1.25, -10.0);

/// Linear contrast `(multiplier, offset)` applied to RGB to deepen the ink
const INK_CONTRAST: (f32, f32) = (1.2, -8.0);

/// Median window radius for speckle removal (3x3)
const MEDIAN_RADIUS: u32 = 1;

/// Default width cap for stored signatures
pub const DEFAULT_MAX_WIDTH: u32 = 1600;

/// Remove the light background from a signature image.
///
/// Returns PNG bytes with an alpha channel, or an empty vector when the
/// input is empty or cannot be decoded. Callers must treat an empty result
/// as a failed upload.
pub fn transparentize(image_bytes: &[u8]) -> Vec<u8> {
    match try_transparentize(image_bytes) {
        Ok(png) => png,
        Err(e) => {
            tracing::debug!(error = %e, len = image_bytes.len(), "Signature filter produced no output");
            Vec::new()
        }
    }
}

/// Fallible form of [`transparentize`] that reports why it failed.
pub fn try_transparentize(image_bytes: &[u8]) -> Result<Vec<u8>, FilterError> {
    if image_bytes.is_empty() {
        return Err(FilterError::Empty);
    }

    let decoded =
        image::load_from_memory(image_bytes).map_err(|e| FilterError::Decode(e.to_string()))?;

    // Any existing alpha is dropped; the mask is rebuilt from luminance
    let base = decoded.to_rgb8();
    let alpha = ink_mask(&base);

    let (width, height) = base.dimensions();
    let mut output = RgbaImage::new(width, height);
    for (x, y, pixel) in base.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let a = alpha.get_pixel(x, y).0[0];
        output.put_pixel(
            x,
            y,
            Rgba([
                linear(r, INK_CONTRAST),
                linear(g, INK_CONTRAST),
                linear(b, INK_CONTRAST),
                a,
            ]),
        );
    }

    encode_png(&DynamicImage::ImageRgba8(output))
}

/// Shrink a PNG so it is at most `max_width` pixels wide.
///
/// Images already narrow enough keep their size. The result is always PNG.
pub fn fit_width(png_bytes: &[u8], max_width: u32) -> Result<Vec<u8>, FilterError> {
    if png_bytes.is_empty() {
        return Err(FilterError::Empty);
    }

    let image =
        image::load_from_memory(png_bytes).map_err(|e| FilterError::Decode(e.to_string()))?;
    let (width, height) = image.dimensions();

    if max_width == 0 || width <= max_width {
        return encode_png(&image);
    }

    let scaled_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1);
    let resized = imageops::resize(
        &image.to_rgba8(),
        max_width,
        scaled_height as u32,
        FilterType::Lanczos3,
    );
    tracing::debug!(width, height, max_width, scaled_height, "Resized signature");

    encode_png(&DynamicImage::ImageRgba8(resized))
}

/// Inverted, gamma-curved, contrast-boosted and denoised luminance
fn ink_mask(base: &RgbImage) -> GrayImage {
    let curve = alpha_curve();
    let mut luma = imageops::grayscale(base);
    for pixel in luma.pixels_mut() {
        pixel.0[0] = curve[pixel.0[0] as usize];
    }
    median_filter(&luma, MEDIAN_RADIUS, MEDIAN_RADIUS)
}

/// Lookup table from luminance to alpha
fn alpha_curve() -> [u8; 256] {
    let mut table = [0u8; 256];
    for (value, slot) in table.iter_mut().enumerate() {
        let inverted = 255.0 - value as f32;
        let curved = 255.0 * (inverted / 255.0).powf(ALPHA_GAMMA);
        *slot = linear_f32(curved, ALPHA_CONTRAST);
    }
    table
}

fn linear(value: u8, params: (f32, f32)) -> u8 {
    linear_f32(f32::from(value), params)
}

fn linear_f32(value: f32, (multiplier, offset): (f32, f32)) -> u8 {
    (value * multiplier + offset).round().clamp(0.0, 255.0) as u8
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, FilterError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| FilterError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// White 60x30 canvas with a solid black band across the middle
    fn stroke_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(60, 30, Rgb([255, 255, 255]));
        for y in 12..18 {
            for x in 5..55 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        img
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_empty_input_returns_empty() {
        assert!(transparentize(&[]).is_empty());
        assert!(matches!(try_transparentize(&[]), Err(FilterError::Empty)));
    }

    #[test]
    fn test_garbage_input_returns_empty() {
        assert!(transparentize(b"definitely not an image").is_empty());
        assert!(matches!(
            try_transparentize(b"definitely not an image"),
            Err(FilterError::Decode(_))
        ));
    }

    #[test]
    fn test_background_transparent_stroke_opaque() {
        let png = encode(DynamicImage::ImageRgb8(stroke_image()), ImageFormat::Png);
        let output = transparentize(&png);
        assert!(!output.is_empty());
        assert!(output.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (60, 30));
        let rgba = decoded.to_rgba8();

        let background = rgba.get_pixel(2, 2).0;
        assert!(background[3] < 16, "background alpha {}", background[3]);

        let stroke = rgba.get_pixel(30, 15).0;
        assert!(stroke[3] > 240, "stroke alpha {}", stroke[3]);
        assert!(stroke[0] < 16, "stroke should stay dark");
    }

    #[test]
    fn test_jpeg_input_is_accepted() {
        let jpeg = encode(DynamicImage::ImageRgb8(stroke_image()), ImageFormat::Jpeg);
        let output = transparentize(&jpeg);
        assert!(!output.is_empty());

        let rgba = image::load_from_memory(&output).unwrap().to_rgba8();
        assert!(rgba.get_pixel(30, 15).0[3] > 200);
        assert!(rgba.get_pixel(1, 1).0[3] < 40);
    }

    #[test]
    fn test_webp_input_is_accepted() {
        let webp = encode(DynamicImage::ImageRgb8(stroke_image()), ImageFormat::WebP);
        let output = transparentize(&webp);
        assert!(!output.is_empty());

        let rgba = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(rgba.dimensions(), (60, 30));
        assert!(rgba.get_pixel(30, 15).0[3] > 200);
        assert!(rgba.get_pixel(1, 1).0[3] < 40);
    }

    #[test]
    fn test_existing_alpha_is_ignored() {
        // Opaque white with one fully transparent white corner: the mask is
        // rebuilt from color alone, so both read as background
        let mut img = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
        img.put_pixel(0, 0, Rgba([255, 255, 255, 0]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let rgba = image::load_from_memory(&transparentize(&png))
            .unwrap()
            .to_rgba8();
        assert!(rgba.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_ink_is_darkened() {
        assert_eq!(linear(100, INK_CONTRAST), 112);
        assert_eq!(linear(0, INK_CONTRAST), 0);
        assert_eq!(linear(255, INK_CONTRAST), 255);
    }

    #[test]
    fn test_alpha_curve_endpoints() {
        let curve = alpha_curve();
        assert_eq!(curve[255], 0);
        assert_eq!(curve[0], 255);
        assert!(curve.windows(2).all(|w| w[0] >= w[1]), "curve must be monotonic");
    }

    #[test]
    fn test_fit_width_downscales() {
        let img = RgbaImage::from_pixel(2000, 100, Rgba([0, 0, 0, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let fitted = fit_width(&png, DEFAULT_MAX_WIDTH).unwrap();
        let decoded = image::load_from_memory(&fitted).unwrap();
        assert_eq!(decoded.dimensions(), (1600, 80));
    }

    #[test]
    fn test_fit_width_never_upscales() {
        let img = RgbaImage::from_pixel(100, 40, Rgba([0, 0, 0, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let fitted = fit_width(&png, DEFAULT_MAX_WIDTH).unwrap();
        let decoded = image::load_from_memory(&fitted).unwrap();
        assert_eq!(decoded.dimensions(), (100, 40));
    }

    #[test]
    fn test_fit_width_empty() {
        assert!(matches!(fit_width(&[], 10), Err(FilterError::Empty)));
    }
}
