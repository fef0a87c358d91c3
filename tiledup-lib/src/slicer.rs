use glam::UVec2;
use image::RgbaImage;

use crate::{
    error::{Error, Result},
    tile::{pattern_len, TileBlock, U8Pattern, CHANNELS},
    Area, Grid, UVec2Iter,
};

/// The decoded map image. Always RGBA8, never mutated after loading.
pub type SourceImage = RgbaImage;

/// Wraps an already decoded RGBA8 buffer, rejecting buffers that are too short or too long
pub fn source_image_from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<SourceImage> {
    let expected = width as usize * height as usize * CHANNELS;
    if pixels.len() != expected {
        let reason = format!(
            "pixel buffer holds {} bytes but a {width}x{height} RGBA8 image needs {expected}",
            pixels.len()
        );
        return Err(Error::corrupt(UVec2::ZERO, reason));
    }
    return RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::corrupt(UVec2::ZERO, "pixel buffer rejected by image"));
}

/// Number of tile columns and rows in an image.
/// Non tile-aligned images are refused rather than padded or cropped.
pub fn grid_dims<U: Into<UVec2>>(image_dims: U, tile_size: UVec2) -> Result<Grid> {
    let image_dims: UVec2 = image_dims.into();
    if tile_size.x == 0 || tile_size.y == 0 {
        return Err(Error::dimension(image_dims, tile_size, "tile size must be non-zero"));
    }
    if image_dims.x == 0 || image_dims.y == 0 {
        return Err(Error::dimension(image_dims, tile_size, "image is empty"));
    }
    if image_dims.x % tile_size.x != 0 {
        return Err(Error::dimension(
            image_dims,
            tile_size,
            "width is not a multiple of the tile width",
        ));
    }
    if image_dims.y % tile_size.y != 0 {
        return Err(Error::dimension(
            image_dims,
            tile_size,
            "height is not a multiple of the tile height",
        ));
    }
    return Ok(Grid(image_dims / tile_size));
}

/// Lazily cuts an image into tile blocks, row by row, left to right
pub fn slice(image: &SourceImage, tile_size: UVec2) -> Result<TileBlocks<'_>> {
    let grid = grid_dims(image.dimensions(), tile_size)?;
    log::debug!(
        "slicing {}x{} px image into {}x{} tiles of {}x{} px",
        image.width(),
        image.height(),
        grid.x,
        grid.y,
        tile_size.x,
        tile_size.y
    );
    return Ok(TileBlocks {
        image,
        tile_size,
        locs: grid.iter_locs(),
        grid,
        last_progress: 0,
    });
}

#[derive(Debug, Clone)]
pub struct TileBlocks<'a> {
    image: &'a SourceImage,
    tile_size: UVec2,
    grid: Grid,
    locs: UVec2Iter,
    last_progress: u32,
}

impl TileBlocks<'_> {
    pub fn grid(&self) -> &Grid {
        return &self.grid;
    }

    pub fn tile_size(&self) -> UVec2 {
        return self.tile_size;
    }

    fn log_progress(&mut self, row: u32) {
        let percent = row * 100 / self.grid.y;
        if percent >= self.last_progress + 10 {
            self.last_progress = percent - percent % 10;
            log::debug!("sliced {}% of tile rows", self.last_progress);
        }
    }
}

impl Iterator for TileBlocks<'_> {
    type Item = Result<TileBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.locs.next()?;
        if self.locs.len() == 0 {
            self.log_progress(self.grid.y);
        } else if pos.x == 0 && pos.y > 0 {
            self.log_progress(pos.y);
        }
        let block = pattern_at(self.image, pos, self.tile_size).map(|pixels| TileBlock { pos, pixels });
        return Some(block);
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        return self.locs.size_hint();
    }
}

impl ExactSizeIterator for TileBlocks<'_> {}

/// Copies the pixels of the tile at grid position `pos`
pub fn pattern_at(image: &SourceImage, pos: UVec2, tile_size: UVec2) -> Result<U8Pattern> {
    let raw: &[u8] = image.as_raw();
    let row_len = tile_size.x as usize * CHANNELS;
    let image_row_len = image.width() as usize * CHANNELS;
    let origin = pos * tile_size;

    let mut pixels = Vec::with_capacity(pattern_len(tile_size));
    for y in origin.y..origin.y + tile_size.y {
        let start = y as usize * image_row_len + origin.x as usize * CHANNELS;
        let row = raw
            .get(start..start + row_len)
            .ok_or_else(|| Error::corrupt(pos, format!("pixel row {y} is outside the image buffer")))?;
        pixels.extend_from_slice(row);
    }
    return Ok(pixels);
}

/// Total number of tiles an image of `image_dims` is cut into
pub fn tile_count<U: Into<UVec2>>(image_dims: U, tile_size: UVec2) -> Result<u32> {
    return grid_dims(image_dims, tile_size).map(|grid| grid.area());
}

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgba;

    /// every pixel gets a unique colour so coverage can be checked
    fn numbered_image(dims: UVec2) -> SourceImage {
        return RgbaImage::from_fn(dims.x, dims.y, |x, y| {
            Rgba([x as u8, y as u8, (x ^ y) as u8, 255])
        });
    }

    #[test]
    fn slices_every_cell_in_row_major_order() {
        let image = numbered_image(UVec2::new(12, 8));
        let tile_size = UVec2::new(4, 2);
        let blocks: Vec<TileBlock> = slice(&image, tile_size)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(blocks.len(), (12 / 4) * (8 / 2));
        assert_eq!(blocks[0].pos, UVec2::new(0, 0));
        assert_eq!(blocks[1].pos, UVec2::new(1, 0));
        assert_eq!(blocks[3].pos, UVec2::new(0, 1));
        assert!(blocks.iter().all(|b| b.pixels.len() == 4 * 2 * 4));
    }

    #[test]
    fn blocks_cover_each_pixel_once() {
        let dims = UVec2::new(9, 6);
        let image = numbered_image(dims);
        let tile_size = UVec2::new(3, 3);
        let mut seen = vec![0u32; (dims.x * dims.y) as usize];
        for block in slice(&image, tile_size).unwrap() {
            let block = block.unwrap();
            for (i, px) in block.pixels.chunks_exact(4).enumerate() {
                let (x, y) = (px[0] as u32, px[1] as u32);
                let i = i as u32;
                assert_eq!(x, block.pos.x * 3 + i % 3);
                assert_eq!(y, block.pos.y * 3 + i / 3);
                seen[(y * dims.x + x) as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn non_aligned_image_is_a_dimension_error() {
        let image = numbered_image(UVec2::new(10, 8));
        let err = slice(&image, UVec2::splat(4)).unwrap_err();
        assert!(matches!(err, Error::Dimension { image_width: 10, tile_width: 4, .. }));

        let image = numbered_image(UVec2::new(8, 10));
        assert!(matches!(
            slice(&image, UVec2::splat(4)),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn zero_tile_size_and_empty_image_are_refused() {
        assert!(matches!(
            grid_dims((8, 8), UVec2::new(0, 4)),
            Err(Error::Dimension { .. })
        ));
        assert!(matches!(
            grid_dims((0, 8), UVec2::splat(4)),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn short_raw_buffer_is_corrupt() {
        let err = source_image_from_raw(4, 4, vec![0; 4 * 4 * 4 - 1]).unwrap_err();
        assert!(matches!(err, Error::CorruptTile { .. }));
        assert!(source_image_from_raw(4, 4, vec![0; 4 * 4 * 4]).is_ok());
    }

    #[test]
    fn size_hint_matches_tile_count() {
        let image = numbered_image(UVec2::new(16, 8));
        let blocks = slice(&image, UVec2::splat(4)).unwrap();
        assert_eq!(blocks.len(), 8);
        assert_eq!(tile_count((16, 8), UVec2::splat(4)).unwrap(), 8);
    }

    #[test]
    fn progress_reaches_the_last_row() {
        let image = numbered_image(UVec2::new(8, 12));
        let mut blocks = slice(&image, UVec2::splat(4)).unwrap();
        for _ in 0..5 {
            blocks.next().unwrap().unwrap();
        }
        assert_eq!(blocks.last_progress, 60);
        blocks.next().unwrap().unwrap();
        assert_eq!(blocks.last_progress, 100);
        assert!(blocks.next().is_none());
    }
}
