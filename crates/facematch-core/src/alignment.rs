//! Face alignment onto dlib's face chip.
//!
//! The encoder was trained on 150x150 chips cut around dlib's mean face with
//! 25% padding. SCRFD's eye landmarks are fitted onto the eye centres of that
//! chip, so the encoder sees the face framed the way it expects.

use image::{Rgb, RgbImage};

/// Side length of the chip fed to the face encoder.
pub const CHIP_SIZE: u32 = 150;

/// Border around the mean face, as a fraction of its extent.
const CHIP_PADDING: f32 = 0.25;

/// dlib's five-point mean face in unpadded unit coordinates: outer and inner
/// corner of the image-right eye, outer and inner corner of the image-left
/// eye, base of the nose.
const MEAN_FACE: [(f32, f32); 5] = [
    (0.859_567_46, 0.213_498_15),
    (0.646_060_5, 0.228_967_44),
    (0.120_575_06, 0.213_727_45),
    (0.334_085_06, 0.229_064_24),
    (0.490_112_3, 0.627_797_5),
];

/// A unit mean-face point placed on a padded `size` chip.
fn chip_point((x, y): (f32, f32), size: u32) -> (f32, f32) {
    let scale = size as f32 / (1.0 + 2.0 * CHIP_PADDING);
    ((CHIP_PADDING + x) * scale, (CHIP_PADDING + y) * scale)
}

/// Eye centres on a `size` chip, image-left eye first.
pub fn eye_centres(size: u32) -> [(f32, f32); 2] {
    let mid = |outer: usize, inner: usize| {
        let (p, q) = (chip_point(MEAN_FACE[outer], size), chip_point(MEAN_FACE[inner], size));
        ((p.0 + q.0) / 2.0, (p.1 + q.1) / 2.0)
    };
    [mid(2, 3), mid(0, 1)]
}

/// Least-squares similarity transform from `src` to `dst`.
///
/// Closed form over centred point sets; exact for two points. Returns the 2x3
/// matrix `[a, -b, tx, b, a, ty]`, where `(a, b)` encode scale and rotation.
fn estimate_similarity(src: &[(f32, f32)], dst: &[(f32, f32)]) -> [f32; 6] {
    let n = src.len().min(dst.len()).max(1) as f32;
    let centroid = |pts: &[(f32, f32)]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);

    let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (px, py) = (sx - scx, sy - scy);
        let (qx, qy) = (dx - dcx, dy - dcy);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm += px * px + py * py;
    }

    if norm < 1e-12 {
        // All landmarks coincide.
        return [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = dcx - (a * scx - b * scy);
    let ty = dcy - (b * scx + a * scy);
    [a, -b, tx, b, a, ty]
}

/// Inverse-map every output pixel through `matrix` with bilinear sampling.
///
/// Samples outside the source are black.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx, b, ty) = (matrix[0], matrix[2], matrix[3], matrix[5]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (image.width() as i32, image.height() as i32);
    let sample = |x: i32, y: i32, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        Rgb(std::array::from_fn(|c| {
            let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            v.round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Align a face to a `CHIP_SIZE` x `CHIP_SIZE` RGB chip.
///
/// Only the two eye landmarks are used. SCRFD's nose tip and mouth corners
/// have no counterpart in dlib's mean face.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity(&landmarks[..2], &eye_centres(CHIP_SIZE));
    warp_affine(image, &matrix, CHIP_SIZE)
}
