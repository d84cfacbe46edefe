//! Frame sources

use std::path::PathBuf;

use tracing::{debug, info};

use crate::{FrameError, SourceConfig, VideoFrame};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// A pull-based stream of frames
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the source is exhausted.
    ///
    /// An `Err` concerns a single frame; callers may keep pulling.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError>;

    /// Nominal frame rate (0 = unpaced)
    fn fps(&self) -> u32 {
        0
    }
}

/// Replays the images of a directory in file-name order
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    config: SourceConfig,
}

impl ImageDirSource {
    /// Scan the configured directory for image files
    pub fn open(config: SourceConfig) -> Result<Self, FrameError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&config.path)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();

        info!("Opened frame directory {:?} with {} frames", config.path, paths.len());

        Ok(Self {
            paths,
            cursor: 0,
            config,
        })
    }

    /// Total number of frames in the directory
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let sequence = self.cursor as u32;
        self.cursor += 1;

        debug!("Reading frame {} from {:?}", sequence, path);
        let bytes = std::fs::read(path)?;
        let mut frame = VideoFrame::decode(&bytes, &self.config.limits)?;

        frame.sequence = sequence;
        frame.timestamp_ns = if self.config.fps > 0 {
            sequence as u64 * 1_000_000_000 / self.config.fps as u64
        } else {
            0
        };

        if self.config.mirror {
            frame = frame.mirrored();
        }

        Ok(Some(frame))
    }

    fn fps(&self) -> u32 {
        self.config.fps
    }
}
