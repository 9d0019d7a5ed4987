//! Grayscale frames: decoding, pixel statistics, CLAHE and annotation.

use crate::types::BoundingBox;
use image::{GrayImage, RgbImage};
use std::path::Path;

/// A decoded grayscale image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Build a frame from raw grayscale bytes.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected || expected == 0 {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Decode an encoded image (PNG/JPEG) and convert it to grayscale.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let gray = image::load_from_memory(bytes)?.to_luma8();
        Self::from_image(gray)
    }

    /// Read and decode an image file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let gray = image::open(path.as_ref())?.to_luma8();
        Self::from_image(gray)
    }

    fn from_image(gray: GrayImage) -> Result<Self, FrameError> {
        let (width, height) = gray.dimensions();
        Self::from_gray(gray.into_raw(), width, height)
    }

    /// Convert back to an `image` buffer for encoding.
    pub fn to_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Encode to disk; the format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FrameError> {
        let img = self.to_image().ok_or(FrameError::InvalidLength {
            expected: (self.width * self.height) as usize,
            actual: self.data.len(),
        })?;
        img.save(path.as_ref())?;
        Ok(())
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        mean(&self.data) as f32
    }

    /// Copy out the region covered by `face`, clamped to the frame bounds.
    ///
    /// Returns `None` if the clamped region is empty.
    pub fn crop(&self, face: &BoundingBox) -> Option<Frame> {
        let x0 = face.x.max(0.0).floor() as u32;
        let y0 = face.y.max(0.0).floor() as u32;
        let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        let w = (x1 - x0) as usize;
        let mut data = Vec::with_capacity(w * (y1 - y0) as usize);
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            data.extend_from_slice(&self.data[row + x0 as usize..row + x1 as usize]);
        }
        Some(Frame {
            data,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    /// Draw the face box outline and a small cross on each landmark.
    pub fn annotate(&mut self, face: &BoundingBox) {
        let x0 = face.x.round() as i64;
        let y0 = face.y.round() as i64;
        let x1 = (face.x + face.width).round() as i64;
        let y1 = (face.y + face.height).round() as i64;

        for x in x0..=x1 {
            self.put(x, y0, 255);
            self.put(x, y1, 255);
        }
        for y in y0..=y1 {
            self.put(x0, y, 255);
            self.put(x1, y, 255);
        }

        if let Some(landmarks) = &face.landmarks {
            for &(lx, ly) in landmarks {
                let (cx, cy) = (lx.round() as i64, ly.round() as i64);
                for d in -2..=2 {
                    self.put(cx + d, cy, 255);
                    self.put(cx, cy + d, 255);
                }
            }
        }
    }

    fn put(&mut self, x: i64, y: i64, value: u8) {
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            self.data[y as usize * self.width as usize + x as usize] = value;
        }
    }
}

/// Mean of the pixel values.
pub fn mean(gray: &[u8]) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&b| b as f64).sum::<f64>() / gray.len() as f64
}

/// Population standard deviation of the pixel values.
pub fn stddev(gray: &[u8]) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    let m = mean(gray);
    let variance = gray.iter().map(|&b| (b as f64 - m).powi(2)).sum::<f64>() / gray.len() as f64;
    variance.sqrt()
}

/// Variance of the 4-neighbour Laplacian response `[0 1 0; 1 -4 1; 0 1 0]`.
///
/// Borders are handled by reflecting across the edge pixel, so a uniform
/// image has zero variance.
pub fn laplacian_variance(gray: &[u8], width: u32, height: u32) -> f64 {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return 0.0;
    }

    let reflect = |i: isize, n: usize| -> usize {
        if n == 1 {
            0
        } else if i < 0 {
            (-i) as usize
        } else if i as usize >= n {
            2 * (n - 1) - i as usize
        } else {
            i as usize
        }
    };

    let px = |x: isize, y: isize| -> f64 { gray[reflect(y, h) * w + reflect(x, w)] as f64 };

    let mut responses = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let lap = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f64;
    let m = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - m).powi(2)).sum::<f64>() / n
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// Divides the image into a grid of tiles, computes a clipped histogram
/// per tile, builds CDFs, and uses bilinear interpolation between tile
/// CDFs for smooth output.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles_x: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || tiles_x == 0 || gray.len() < w * h {
        return;
    }

    let tx = tiles_x as usize;
    let ty = tx; // square grid
    let tile_w = w / tx;
    let tile_h = h / ty;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);

    for row in 0..ty {
        for col in 0..tx {
            let mut hist = [0u32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;

            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = (tile_pixels as f32) - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (ty - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (tx - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(ty - 1);
            let c1 = (c0 + 1).min(tx - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let tl = cdfs[r0 * tx + c0][pixel];
            let tr = cdfs[r0 * tx + c1][pixel];
            let bl = cdfs[r1 * tx + c0][pixel];
            let br = cdfs[r1 * tx + c1][pixel];

            let top = tl * (1.0 - dx) + tr * dx;
            let bot = bl * (1.0 - dx) + br * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// CLAHE on the luma of an RGB image, keeping its chroma.
///
/// Pixels go to full-range BT.601 YCbCr, Y is equalized with
/// [`clahe_enhance`], and the result is converted back. Gray pixels stay gray.
pub fn clahe_enhance_rgb(image: &mut RgbImage, tiles_x: u32, clip_limit: f32) {
    let (width, height) = image.dimensions();
    let mut luma = Vec::with_capacity((width * height) as usize);
    let mut chroma = Vec::with_capacity((width * height) as usize);
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        luma.push(y.round().clamp(0.0, 255.0) as u8);
        chroma.push((0.564 * (b - y), 0.713 * (r - y)));
    }

    clahe_enhance(&mut luma, width, height, tiles_x, clip_limit);

    for ((pixel, y), (cb, cr)) in image.pixels_mut().zip(luma).zip(chroma) {
        let y = f32::from(y);
        let r = y + 1.403 * cr;
        let g = y - 0.344 * cb - 0.714 * cr;
        let b = y + 1.773 * cb;
        pixel.0 = [r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid grayscale buffer: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0, landmarks: None }
    }

    #[test]
    fn test_from_gray_rejects_wrong_length() {
        assert!(Frame::from_gray(vec![0; 5], 2, 2).is_err());
        assert!(Frame::from_gray(vec![], 0, 0).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Frame::decode(b"definitely not a png").is_err());
    }

    #[test]
    fn test_decode_png_roundtrip_dimensions() {
        let img = GrayImage::from_pixel(7, 5, image::Luma([90]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!((frame.width, frame.height), (7, 5));
        assert!((frame.avg_brightness() - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(Frame::open("/nonexistent/face.png").is_err());
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let frame = Frame::from_gray((0..100).collect(), 10, 10).unwrap();
        let crop = frame.crop(&bbox(-3.0, 8.0, 5.0, 10.0)).unwrap();
        assert_eq!((crop.width, crop.height), (2, 2));
        assert_eq!(crop.data, vec![80, 81, 90, 91]);
    }

    #[test]
    fn test_crop_outside_is_none() {
        let frame = Frame::from_gray(vec![0; 100], 10, 10).unwrap();
        assert!(frame.crop(&bbox(20.0, 20.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn test_stddev_uniform_is_zero() {
        assert_eq!(stddev(&[42u8; 64]), 0.0);
    }

    #[test]
    fn test_stddev_two_levels() {
        let data: Vec<u8> = [0u8, 128].iter().cycle().take(100).copied().collect();
        assert!((stddev(&data) - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_laplacian_uniform_is_zero() {
        assert_eq!(laplacian_variance(&[128u8; 100], 10, 10), 0.0);
    }

    #[test]
    fn test_laplacian_checkerboard_is_sharp() {
        let w = 16u32;
        let data: Vec<u8> = (0..w * w)
            .map(|i| if (i % w + i / w) % 2 == 0 { 0 } else { 255 })
            .collect();
        assert!(laplacian_variance(&data, w, w) > 1000.0);
    }

    #[test]
    fn test_annotate_draws_box_edges() {
        let mut frame = Frame::from_gray(vec![0; 400], 20, 20).unwrap();
        frame.annotate(&bbox(2.0, 2.0, 10.0, 10.0));
        assert_eq!(frame.data[2 * 20 + 2], 255);
        assert_eq!(frame.data[12 * 20 + 12], 255);
        assert_eq!(frame.data[7 * 20 + 7], 0);
    }

    #[test]
    fn test_clahe_increases_contrast() {
        let w = 16u32;
        let h = 16u32;
        let mut gray: Vec<u8> = (0..(w * h) as usize)
            .map(|i| 100 + (i % 11) as u8)
            .collect();

        let orig_stddev = stddev(&gray);
        clahe_enhance(&mut gray, w, h, 2, 0.02);
        let new_stddev = stddev(&gray);

        assert!(
            new_stddev > orig_stddev,
            "CLAHE should increase contrast: orig={orig_stddev:.2}, new={new_stddev:.2}"
        );
    }

    #[test]
    fn test_clahe_rgb_keeps_colour() {
        let mut img = RgbImage::from_fn(16, 16, |x, y| {
            let v = 90 + ((x + y) % 11) as u8;
            image::Rgb([v + 60, v, v - 40])
        });
        let before = img.clone();
        clahe_enhance_rgb(&mut img, 2, 0.02);

        assert_ne!(img, before);
        for pixel in img.pixels() {
            let [r, g, b] = pixel.0;
            assert!(r > g && g > b, "hue lost: {:?}", pixel.0);
        }
    }

    #[test]
    fn test_clahe_rgb_gray_stays_gray() {
        let mut img = RgbImage::from_fn(16, 16, |x, y| {
            let v = 100 + ((x * 3 + y) % 11) as u8;
            image::Rgb([v, v, v])
        });
        clahe_enhance_rgb(&mut img, 2, 0.02);
        for pixel in img.pixels() {
            let [r, g, b] = pixel.0;
            assert!(r == g && g == b, "gray pixel tinted: {:?}", pixel.0);
        }
    }
}
