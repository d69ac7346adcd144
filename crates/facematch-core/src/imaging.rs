//! Image decoding, face cropping and channel reordering.

use crate::types::FaceLocation;
use image::{ImageResult, RgbImage};
use std::path::Path;

/// Decode an encoded image (PNG, JPEG, GIF, BMP, TIFF, ...) into 8-bit RGB.
pub fn decode_image(data: &[u8]) -> ImageResult<RgbImage> {
    Ok(image::load_from_memory(data)?.to_rgb8())
}

/// Open an image file and convert it to 8-bit RGB.
pub fn open_image(path: &Path) -> ImageResult<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Crop `location` out of `image`, clipping to the image bounds.
///
/// Returns `None` when the clipped region has zero area.
pub fn crop_face(image: &RgbImage, location: &FaceLocation) -> Option<RgbImage> {
    let clip = location.trimmed(image.width(), image.height());
    if clip.area() == 0 {
        return None;
    }
    let x = clip.left as u32;
    let y = clip.top as u32;
    let w = (clip.right - clip.left) as u32;
    let h = (clip.bottom - clip.top) as u32;
    Some(image::imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Packed 8-bit image in B, G, R channel order.
///
/// The demographic classifiers were trained on BGR input; keeping the order in
/// the type stops RGB buffers from reaching them by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrImage {
    pub width: u32,
    pub height: u32,
    /// Row-major pixels, three bytes each (B, G, R).
    pub data: Vec<u8>,
}

impl BgrImage {
    /// Swap an RGB image into BGR order.
    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let data = rgb
            .pixels()
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            data,
        }
    }

    /// `[b, g, r]` at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
