use image::{imageops, DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage};
use imageproc::{contrast::threshold, rect::Rect};
use logging_timer::time;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const DARK_GREEN: Rgb<u8> = Rgb([0, 128, 0]);
pub const WHITE_RGB: Rgb<u8> = Rgb([255, 255, 255]);

/// Default gray level below which a pixel counts as ink.
pub const DEFAULT_INK_THRESHOLD: u8 = 100;

/// Converts any decoded image to single-channel luma. Images that are already
/// grayscale pass through unchanged.
pub fn to_gray(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

/// Binarizes an image with an inverted threshold: pixels at or below `cutoff`
/// (ink) become white, everything lighter becomes black.
///
/// ```text
///        INPUT                  OUTPUT
/// ┌──────────────────┐  ┌──────────────────┐
/// │  ██   ░░         │  │██  ██████████████│
/// │  ██   ░░         │  │██  ██████████████│
/// └──────────────────┘  └──────────────────┘
/// ```
#[time]
pub fn threshold_inverted(img: &GrayImage, cutoff: u8) -> GrayImage {
    let mut out = threshold(img, cutoff);
    imageops::invert(&mut out);
    out
}

/// Determines the number of pixels in an image that are not black.
pub fn count_nonzero(img: &GrayImage) -> u32 {
    img.pixels().filter(|p| **p != BLACK).count() as u32
}

/// Rotates the image 90° clockwise if it is taller than it is wide. Forms are
/// always landscape once properly oriented.
pub fn rotate_to_landscape(img: DynamicImage) -> DynamicImage {
    if img.height() > img.width() {
        img.rotate90()
    } else {
        img
    }
}

/// Resizes an image to exactly `width` x `height` with bilinear sampling.
pub fn size_image_to_fit(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, imageops::FilterType::Triangle)
}

/// Renders a binary (ink = white) image the way a human reads it, ink dark on
/// a light page, in color so it can be annotated.
pub fn to_annotation_canvas(img: &GrayImage) -> RgbImage {
    let mut inverted = img.clone();
    imageops::invert(&mut inverted);
    DynamicImage::ImageLuma8(inverted).to_rgb8()
}

/// Surrounds an image with `margin` pixels of `fill` on every side.
pub fn pad_image(img: &GrayImage, margin: u32, fill: Luma<u8>) -> GrayImage {
    let (width, height) = (img.width() + 2 * margin, img.height() + 2 * margin);
    let mut padded = GrayImage::from_pixel(width, height, fill);
    imageops::replace(&mut padded, img, margin as i64, margin as i64);
    padded
}

/// Crops `rect` out of the image, clamped to the image bounds.
pub fn crop_to_rect(img: &GrayImage, rect: &Rect) -> GrayImage {
    let left = rect.left().max(0) as u32;
    let top = rect.top().max(0) as u32;
    let right = (rect.right().max(0) as u32).min(img.width().saturating_sub(1));
    let bottom = (rect.bottom().max(0) as u32).min(img.height().saturating_sub(1));
    if left > right || top > bottom {
        return GrayImage::new(0, 0);
    }
    imageops::crop_imm(img, left, top, right - left + 1, bottom - top + 1).to_image()
}
