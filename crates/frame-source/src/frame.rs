//! Video frame types and preprocessing

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageReader, Limits, RgbImage};

use crate::contrast::{self, ClaheConfig};
use crate::{FrameError, FrameLimits};

/// Smallest decoder allocation budget, whatever the pixel limit
pub const MIN_DECODE_ALLOC: u64 = 1 << 20;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidDimensions(format!(
                "{}x{} RGB frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        })
    }

    /// Wrap an RGB image buffer
    pub fn from_rgb_image(img: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    ///
    /// The header is checked against `limits` before pixel data is
    /// allocated; the decoder itself is capped at 8 bytes per allowed pixel,
    /// with a floor of [`MIN_DECODE_ALLOC`] for decoder working memory.
    pub fn decode(bytes: &[u8], limits: &FrameLimits) -> Result<Self, FrameError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        limits.check(width as u64, height as u64)?;

        let mut decode_limits = Limits::default();
        decode_limits.max_image_width = Some(limits.max_dimension);
        decode_limits.max_image_height = Some(limits.max_dimension);
        decode_limits.max_alloc = Some(limits.max_pixels.saturating_mul(8).max(MIN_DECODE_ALLOC));

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        reader.limits(decode_limits);
        let img = reader.decode().map_err(|e| FrameError::Decode(e.to_string()))?;

        let rgb = img.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(FrameError::InvalidDimensions("decoded image is empty".into()));
        }
        Ok(Self::from_rgb_image(rgb, 0, 0))
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy into an `image` RGB buffer
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            FrameError::InvalidDimensions(format!("{}x{} buffer size mismatch", self.width, self.height))
        })
    }

    /// Convert to grayscale
    // Same weights as OpenCV BGR2GRAY; `image`'s grayscale uses Rec. 709 weights
    pub fn to_grayscale(&self) -> GrayImage {
        let mut gray = Vec::with_capacity((self.width * self.height) as usize);
        for pixel in self.data.chunks_exact(3) {
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let y = (pixel[0] as f32 * 0.299
                   + pixel[1] as f32 * 0.587
                   + pixel[2] as f32 * 0.114) as u8;
            gray.push(y);
        }
        GrayImage::from_raw(self.width, self.height, gray).unwrap_or_else(|| GrayImage::new(0, 0))
    }

    /// Grayscale with contrast-limited adaptive histogram equalization,
    /// used to boost contrast before face detection on live frames
    pub fn to_clahe_grayscale(&self, config: &ClaheConfig) -> GrayImage {
        contrast::clahe(&self.to_grayscale(), config)
    }

    /// Crop a region of the frame
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        let fits = x.checked_add(w).is_some_and(|r| r <= self.width)
            && y.checked_add(h).is_some_and(|b| b <= self.height);
        if w == 0 || h == 0 || !fits {
            return None;
        }
        let img = self.to_rgb_image().ok()?;
        let cropped = imageops::crop_imm(&img, x, y, w, h).to_image();
        Some(VideoFrame::from_rgb_image(cropped, self.timestamp_ns, self.sequence))
    }

    /// Crop a floating point box, clipped to the frame bounds.
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop_clamped(&self, x: f64, y: f64, w: f64, h: f64) -> Option<VideoFrame> {
        let x0 = x.max(0.0).floor() as u32;
        let y0 = y.max(0.0).floor() as u32;
        let x1 = ((x + w).min(self.width as f64).ceil().max(0.0)) as u32;
        let y1 = ((y + h).min(self.height as f64).ceil().max(0.0)) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        self.crop(x0, y0, x1 - x0, y1 - y0)
    }

    /// Resize frame using bilinear (triangle) filtering
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let resized = match self.to_rgb_image() {
            Ok(img) => imageops::resize(&img, new_width, new_height, FilterType::Triangle),
            Err(_) => RgbImage::new(new_width, new_height),
        };
        VideoFrame::from_rgb_image(resized, self.timestamp_ns, self.sequence)
    }

    /// Resize to `width`, keeping the aspect ratio.
    ///
    /// Fails with [`FrameError::TooLarge`] before allocating when the
    /// rescaled frame would exceed `limits.max_pixels`.
    pub fn resize_to_width(&self, width: u32, limits: &FrameLimits) -> Result<VideoFrame, FrameError> {
        if width == self.width || self.width == 0 {
            return Ok(self.clone());
        }
        let height = (self.height as f64 * width as f64 / self.width as f64).round().max(1.0);
        let pixels = width as f64 * height;
        if !pixels.is_finite() || pixels > limits.max_pixels as f64 || height > u32::MAX as f64 {
            return Err(FrameError::TooLarge {
                width: width as u64,
                height: height as u64,
                max_pixels: limits.max_pixels,
            });
        }
        Ok(self.resize(width, height as u32))
    }

    /// Mirror the frame horizontally
    pub fn mirrored(&self) -> VideoFrame {
        match self.to_rgb_image() {
            Ok(img) => VideoFrame::from_rgb_image(
                imageops::flip_horizontal(&img),
                self.timestamp_ns,
                self.sequence,
            ),
            Err(_) => self.clone(),
        }
    }

    /// Pixels scaled to `[0, 1]` in HWC order.
    ///
    /// With `grayscale` set, one luminance channel per pixel is produced,
    /// otherwise the three RGB channels.
    pub fn normalized_pixels(&self, grayscale: bool) -> Vec<f32> {
        if grayscale {
            self.to_grayscale()
                .into_raw()
                .into_iter()
                .map(|v| v as f32 / 255.0)
                .collect()
        } else {
            self.data.iter().map(|&v| v as f32 / 255.0).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 128]));
        VideoFrame::from_rgb_image(img, 7, 3)
    }

    #[test]
    fn test_new_rejects_wrong_buffer_size() {
        assert!(VideoFrame::new(vec![0; 10], 2, 2, 0, 0).is_err());
        assert!(VideoFrame::new(vec![0; 12], 2, 2, 0, 0).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = VideoFrame::decode(b"definitely not an image", &FrameLimits::default()).unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let frame = VideoFrame::decode(&png(4, 3), &FrameLimits::default()).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.get_pixel(1, 1), Some([10, 20, 30]));
    }

    #[test]
    fn test_decode_rejects_oversized_header() {
        let limits = FrameLimits {
            max_dimension: 64,
            max_pixels: 1_000,
        };
        assert!(matches!(
            VideoFrame::decode(&png(65, 1), &limits),
            Err(FrameError::TooLarge { .. })
        ));
        assert!(matches!(
            VideoFrame::decode(&png(40, 40), &limits),
            Err(FrameError::TooLarge { .. })
        ));
        assert!(VideoFrame::decode(&png(20, 40), &limits).is_ok());
    }

    #[test]
    fn test_tall_narrow_upload_is_not_upscaled() {
        // A few KB of PNG that would become 500x500000 at processing width
        let frame = VideoFrame::decode(&png(2, 2000), &FrameLimits::default()).unwrap();
        let err = frame.resize_to_width(500, &FrameLimits::default()).unwrap_err();
        match err {
            FrameError::TooLarge { width, height, .. } => assert_eq!((width, height), (500, 500_000)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_crop_keeps_metadata() {
        let frame = gradient(10, 10);
        let crop = frame.crop(2, 3, 4, 5).unwrap();
        assert_eq!((crop.width, crop.height), (4, 5));
        assert_eq!(crop.get_pixel(0, 0), Some([2, 3, 128]));
        assert_eq!((crop.timestamp_ns, crop.sequence), (7, 3));
        assert!(frame.crop(8, 8, 4, 4).is_none());
        assert!(frame.crop(u32::MAX, 0, 2, 2).is_none());
    }

    #[test]
    fn test_crop_clamped_clips_to_bounds() {
        let frame = gradient(10, 10);
        let crop = frame.crop_clamped(-2.0, 6.5, 5.0, 10.0).unwrap();
        assert_eq!((crop.width, crop.height), (3, 4));
        assert!(frame.crop_clamped(20.0, 20.0, 5.0, 5.0).is_none());
    }

    #[test]
    fn test_resize_to_width_keeps_aspect() {
        let frame = gradient(1000, 600);
        let resized = frame.resize_to_width(500, &FrameLimits::default()).unwrap();
        assert_eq!((resized.width, resized.height), (500, 300));
        assert_eq!(resized.data.len(), 500 * 300 * 3);
    }

    #[test]
    fn test_mirrored() {
        let frame = gradient(4, 1);
        let mirrored = frame.mirrored();
        assert_eq!(mirrored.get_pixel(0, 0), Some([3, 0, 128]));
    }

    #[test]
    fn test_normalized_pixels() {
        let frame = VideoFrame::new(vec![255, 0, 51], 1, 1, 0, 0).unwrap();
        assert_eq!(frame.normalized_pixels(false), vec![1.0, 0.0, 0.2]);
        assert_eq!(frame.normalized_pixels(true).len(), 1);
    }

    #[test]
    fn test_grayscale_weights() {
        let frame = VideoFrame::new(vec![255, 0, 0, 0, 255, 0, 0, 0, 255], 3, 1, 0, 0).unwrap();
        assert_eq!(frame.to_grayscale().into_raw(), vec![76, 149, 29]);
    }

    #[test]
    fn test_clahe_grayscale_dimensions() {
        let frame = gradient(16, 8);
        let eq = frame.to_clahe_grayscale(&ClaheConfig::default());
        assert_eq!(eq.dimensions(), (16, 8));
    }
}
