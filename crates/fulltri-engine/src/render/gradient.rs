//! CPU rendition of the output-precision gradient.
//!
//! Every band of rows adds a growing power of two to a horizontal ramp before
//! taking the fractional part, so each band loses one more bit of the ramp.
//! The red channel also flags pixels whose ramp value does not survive being
//! scaled down past the smallest subnormal and back up again.

/// Halvings applied on top of the band index before the ramp is scaled back.
const MIN_EXP: i32 = 120;
/// Number of bands over the canvas height.
const BANDS: f32 = 32.0;
/// Rows with a band fraction at or above this are left black as separators.
const BAND_GAP: f32 = 0.9;

fn fract(v: f32) -> f32 {
    v - v.floor()
}

/// Colour of the pixel at fragment coordinate `(frag_x, frag_y)`.
pub fn precision_pixel(frag_x: f32, frag_y: f32, inv_canvas: [f32; 2]) -> [u8; 3] {
    let mut x = 1.0 - frag_x * inv_canvas[0];
    let y = frag_y * inv_canvas[1] * BANDS;
    let band = y.floor() as i32;
    let fade = fract(2f32.powi(band) + x);

    for _ in 0..MIN_EXP + band {
        x /= 2.0;
    }
    for _ in 0..MIN_EXP + band {
        x *= 2.0;
    }

    let fade_r = if x == 0.0 { (fade + 0.5).clamp(0.0, 0.9999) } else { fade };

    if fract(y) < BAND_GAP {
        let v = (fade * 256.0) as u8;
        [(fade_r * 256.0) as u8, v, v]
    } else {
        [0, 0, 0]
    }
}

/// Renders a `width` x `height` RGB8 image, first row first, with fragment
/// coordinates normalized against a `canvas_width` x `canvas_height` canvas.
pub fn precision_gradient(width: u32, height: u32, canvas_width: u32, canvas_height: u32) -> Vec<u8> {
    let inv_canvas = [1.0 / canvas_width as f32, 1.0 / canvas_height as f32];
    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    for i in 0..height {
        for j in 0..width {
            out.extend_from_slice(&precision_pixel(j as f32 + 0.5, i as f32 + 0.5, inv_canvas));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(img: &[u8], width: u32, i: u32, j: u32) -> [u8; 3] {
        let at = ((i * width + j) * 3) as usize;
        [img[at], img[at + 1], img[at + 2]]
    }

    #[test]
    fn size_is_rgb8() {
        assert_eq!(precision_gradient(4, 3, 512, 512).len(), 4 * 3 * 3);
    }

    #[test]
    fn first_band_starts_white() {
        let img = precision_gradient(512, 512, 512, 512);
        assert_eq!(pixel(&img, 512, 0, 0), [255, 255, 255]);
    }

    #[test]
    fn band_separator_rows_are_black() {
        let img = precision_gradient(512, 512, 512, 512);
        assert_eq!(pixel(&img, 512, 15, 100), [0, 0, 0]);
        assert_eq!(pixel(&img, 512, 31, 7), [0, 0, 0]);
        assert_eq!(pixel(&img, 512, 14, 100), [0, 0, 0]);
        assert_ne!(pixel(&img, 512, 13, 100), [0, 0, 0]);
    }

    #[test]
    fn last_band_has_lost_the_ramp() {
        let img = precision_gradient(512, 512, 512, 512);
        // 2^31 + 0.499 rounds to 2^31, and the ramp underflows to zero.
        assert_eq!(pixel(&img, 512, 496, 256), [128, 0, 0]);
    }

    #[test]
    fn ramp_decreases_left_to_right_in_first_band() {
        let img = precision_gradient(512, 512, 512, 512);
        let left = pixel(&img, 512, 3, 10)[1];
        let right = pixel(&img, 512, 3, 500)[1];
        assert!(left > right, "{left} <= {right}");
    }

    #[test]
    fn canvas_scale_is_independent_of_image_size() {
        let small = precision_gradient(8, 8, 512, 512);
        let full = precision_gradient(512, 512, 512, 512);
        for i in 0..8 {
            for j in 0..8 {
                assert_eq!(pixel(&small, 8, i, j), pixel(&full, 512, i, j));
            }
        }
    }
}
