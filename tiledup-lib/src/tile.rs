use glam::UVec2;

/// Index of a unique tile, assigned in order of first appearance
pub type TileId = usize;

/// Index of an output texture sheet
pub type SheetId = usize;

/// A list of type T indexable by TileId
pub type IdMap<T> = Vec<T>;

/// Raw RGBA8 bytes of a tile_width x tile_height block, rows top to bottom
pub type U8Pattern = Vec<u8>;

pub const CHANNELS: usize = 4;

/// One grid cell's worth of pixels cut out of the source image.
/// Only lives between slicing and dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBlock {
    /// grid coordinates (column, row), not pixels
    pub pos: UVec2,
    pub pixels: U8Pattern,
}

pub fn pattern_len(tile_size: UVec2) -> usize {
    return tile_size.x as usize * tile_size.y as usize * CHANNELS;
}

/// Paints a tile pattern into `dest` with its top left corner at pixel `origin`.
/// Returns `None` if the tile would not fit.
pub fn blit_pattern(
    dest: &mut image::RgbaImage,
    pattern: &[u8],
    tile_size: UVec2,
    origin: UVec2,
) -> Option<()> {
    let row_len = tile_size.x as usize * CHANNELS;
    if row_len == 0 || pattern.len() != pattern_len(tile_size) {
        return None;
    }
    if origin.x + tile_size.x > dest.width() || origin.y + tile_size.y > dest.height() {
        return None;
    }
    let dest_row_len = dest.width() as usize * CHANNELS;
    let buf: &mut [u8] = &mut *dest;
    for (row, src) in pattern.chunks_exact(row_len).enumerate() {
        let start = (origin.y as usize + row) * dest_row_len + origin.x as usize * CHANNELS;
        buf.get_mut(start..start + row_len)?.copy_from_slice(src);
    }
    return Some(());
}
