//! Contrast-limited adaptive histogram equalization (CLAHE)

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

const BINS: usize = 256;

/// CLAHE parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheConfig {
    /// Histogram clip limit, relative to a uniform histogram
    pub clip_limit: f32,
    /// Tiles per side
    pub tile_grid: u32,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

/// Equalize `img` per tile, blending neighbouring tile mappings bilinearly.
///
/// The grid shrinks to the image size so that no tile is empty.
pub fn clahe(img: &GrayImage, config: &ClaheConfig) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }
    let grid_x = config.tile_grid.clamp(1, width);
    let grid_y = config.tile_grid.clamp(1, height);

    let mut luts = Vec::with_capacity((grid_x * grid_y) as usize);
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let (x0, x1) = tile_span(tx, grid_x, width);
            let (y0, y1) = tile_span(ty, grid_y, height);
            let tile = imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image();
            luts.push(tile_lut(&tile, config.clip_limit));
        }
    }

    let tile_w = width as f32 / grid_x as f32;
    let tile_h = height as f32 / grid_y as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, ax) = neighbours(x, tile_w, grid_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, grid_y);
        let value = img.get_pixel(x, y)[0] as usize;
        let lut = |tx: u32, ty: u32| luts[(ty * grid_x + tx) as usize][value] as f32;

        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        image::Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_span(index: u32, grid: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / grid as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / grid as u64) as u32;
    (start, end)
}

/// Tiles whose centres bracket `pos`, and the weight of the second one
fn neighbours(pos: u32, tile_size: f32, grid: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile_size - 0.5;
    let last = (grid - 1) as f32;
    let lower = f.floor().clamp(0.0, last);
    let upper = (lower + 1.0).min(last);
    let weight = if upper > lower { (f - lower).clamp(0.0, 1.0) } else { 0.0 };
    (lower as u32, upper as u32, weight)
}

fn tile_lut(tile: &GrayImage, clip_limit: f32) -> [u8; BINS] {
    let area = (tile.width() * tile.height()) as usize;
    let mut hist = imageproc::stats::histogram(tile).channels[0];

    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        let batch = excess / BINS as u32;
        let residual = (excess % BINS as u32) as usize;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (BINS / residual).max(1);
            for bin in hist.iter_mut().step_by(step).take(residual) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; BINS];
    let mut cumulative = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cumulative += count;
        lut[value] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}
