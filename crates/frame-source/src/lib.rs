//! Frame Source Library for the Affect Pipeline
//!
//! Provides the frame type shared by the streaming and request pipelines:
//! - Decoding of uploaded/encoded images
//! - Preprocessing (resize to width, grayscale, CLAHE, crop)
//! - Size limits applied before any decode or resize allocation
//! - A `FrameSource` trait plus an image-directory source for offline streams

pub mod contrast;
pub mod frame;
pub mod source;

pub use contrast::ClaheConfig;
pub use frame::VideoFrame;
pub use source::{FrameSource, ImageDirSource};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Width every frame is resized to before detection
pub const DEFAULT_PROCESSING_WIDTH: u32 = 500;

/// Frame error types
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid frame dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Frame too large: {width}x{height} exceeds {max_pixels} pixels")]
    TooLarge { width: u64, height: u64, max_pixels: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounds on decoded and resized frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLimits {
    /// Largest accepted width or height of an encoded image
    pub max_dimension: u32,
    /// Largest pixel count of a frame, after decoding and after resizing
    pub max_pixels: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_dimension: 8192,
            max_pixels: 12_000_000,
        }
    }
}

impl FrameLimits {
    pub fn check(&self, width: u64, height: u64) -> Result<(), FrameError> {
        let too_wide = width > self.max_dimension as u64 || height > self.max_dimension as u64;
        if too_wide || width.saturating_mul(height) > self.max_pixels {
            return Err(FrameError::TooLarge {
                width,
                height,
                max_pixels: self.max_pixels,
            });
        }
        Ok(())
    }
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory holding the frame images (sorted by file name)
    pub path: PathBuf,
    /// Target FPS for pacing (0 = as fast as frames can be processed)
    pub fps: u32,
    /// Mirror frames horizontally, as a webcam preview would
    pub mirror: bool,
    /// Frames over these bounds are rejected when read
    pub limits: FrameLimits,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("frames"),
            fps: 15,
            mirror: true,
            limits: FrameLimits::default(),
        }
    }
}

impl SourceConfig {
    /// Config for replaying a directory as fast as possible
    pub fn replay(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fps: 0,
            ..Default::default()
        }
    }
}
