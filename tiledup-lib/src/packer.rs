use std::ops::Range;

use glam::UVec2;
use image::RgbaImage;

use crate::{
    config::{PackConfig, SheetSizing},
    dedup::UniqueTileTable,
    error::{Error, Result},
    tile::{blit_pattern, IdMap, SheetId, TileId},
};

/// Where a unique tile ended up, in tile units on its sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetSlot {
    pub sheet: SheetId,
    pub x: u32,
    pub y: u32,
}

/// Size of a sheet in tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub columns: u32,
    pub rows: u32,
}

impl SheetLayout {
    pub fn new(columns: u32, rows: u32) -> Self {
        return Self { columns, rows };
    }

    pub fn capacity(&self) -> usize {
        return self.columns as usize * self.rows as usize;
    }

    /// Index of a slot counted left to right, top to bottom
    pub fn local_index(&self, slot: &SheetSlot) -> u32 {
        return slot.y * self.columns + slot.x;
    }

    /// Sheet size in pixels, `None` if it doesn't fit in u32
    pub fn pixel_size(&self, tile_size: UVec2) -> Option<UVec2> {
        let width = self.columns.checked_mul(tile_size.x)?;
        let height = self.rows.checked_mul(tile_size.y)?;
        return Some(UVec2::new(width, height));
    }
}

/// Maps every unique tile id to exactly one sheet slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetAssignment {
    slots: IdMap<SheetSlot>,
    layouts: Vec<SheetLayout>,
}

impl SheetAssignment {
    pub fn len(&self) -> usize {
        return self.slots.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.slots.is_empty();
    }

    pub fn get(&self, id: TileId) -> Option<SheetSlot> {
        return self.slots.get(id).copied();
    }

    /// `(sheet, index on that sheet)` of tile `id`
    pub fn sheet_local(&self, id: TileId) -> Option<(SheetId, u32)> {
        let slot = self.slots.get(id)?;
        let layout = self.layouts.get(slot.sheet)?;
        return Some((slot.sheet, layout.local_index(slot)));
    }

    pub fn layouts(&self) -> &[SheetLayout] {
        return &self.layouts;
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, SheetSlot)> + '_ {
        return self.slots.iter().copied().enumerate();
    }
}

/// One rendered output texture
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: SheetId,
    pub layout: SheetLayout,
    /// unique tile ids placed on this sheet, in slot order
    pub tiles: Range<TileId>,
    pub image: RgbaImage,
}

impl Sheet {
    /// Share of the sheet's slots that hold a tile, 0.0 to 1.0
    pub fn fill_ratio(&self) -> f32 {
        return self.tiles.len() as f32 / self.layout.capacity() as f32;
    }
}

#[derive(Debug, Clone)]
pub struct PackedSheets {
    pub assignment: SheetAssignment,
    pub sheets: Vec<Sheet>,
}

/// Layouts of the sheets needed for `num_tiles` tiles
pub fn plan_sheets(num_tiles: usize, config: &PackConfig) -> Result<Vec<SheetLayout>> {
    let max = SheetLayout::new(config.max_sheet_tiles.x, config.max_sheet_tiles.y);
    if max.capacity() == 0 {
        return Err(Error::Packing {
            reason: format!(
                "a {}x{} tile sheet can't hold a single tile",
                max.columns, max.rows
            ),
        });
    }

    let mut layouts = Vec::new();
    let mut remaining = num_tiles;
    while remaining > 0 {
        let layout = match config.sizing {
            SheetSizing::Shrink if remaining < max.capacity() => shrunk_layout(max, remaining),
            _ => max,
        };
        remaining -= remaining.min(layout.capacity());
        layouts.push(layout);
    }
    return Ok(layouts);
}

/// Smallest layout of the halving series max, max/2, max/4 ... that holds `num_tiles`
fn shrunk_layout(max: SheetLayout, num_tiles: usize) -> SheetLayout {
    let mut best = max;
    let mut shift = 1;
    loop {
        let candidate = SheetLayout::new((max.columns >> shift).max(1), (max.rows >> shift).max(1));
        if candidate.capacity() < num_tiles || candidate == best {
            return best;
        }
        best = candidate;
        shift += 1;
    }
}

/// Slots for tiles `0..num_tiles`, filled row by row, sheet by sheet
pub fn assign(num_tiles: usize, config: &PackConfig) -> Result<SheetAssignment> {
    let layouts = plan_sheets(num_tiles, config)?;
    let mut slots = Vec::with_capacity(num_tiles);
    for (sheet, layout) in layouts.iter().enumerate() {
        let on_sheet = layout.capacity().min(num_tiles - slots.len());
        for local in 0..on_sheet as u32 {
            slots.push(SheetSlot {
                sheet,
                x: local % layout.columns,
                y: local / layout.columns,
            });
        }
    }
    return Ok(SheetAssignment { slots, layouts });
}

/// Places every unique tile on a sheet and renders the sheets.
/// Unused slots stay fully transparent.
pub fn pack(table: &UniqueTileTable, config: &PackConfig) -> Result<PackedSheets> {
    let tile_size = table.tile_size();
    let assignment = assign(table.len(), config)?;

    let mut sheets = Vec::with_capacity(assignment.layouts().len());
    let mut first_tile = 0;
    for (id, &layout) in assignment.layouts().iter().enumerate() {
        let size = layout.pixel_size(tile_size).ok_or_else(|| Error::Packing {
            reason: format!(
                "a {}x{} tile sheet of {}x{} px tiles is too large",
                layout.columns, layout.rows, tile_size.x, tile_size.y
            ),
        })?;
        let count = layout.capacity().min(table.len() - first_tile);
        sheets.push(Sheet {
            id,
            layout,
            tiles: first_tile..first_tile + count,
            image: RgbaImage::new(size.x, size.y),
        });
        first_tile += count;
    }

    for (tile, pattern) in table.iter() {
        let slot = assignment.get(tile).ok_or_else(|| Error::Packing {
            reason: format!("tile {tile} was not assigned a slot"),
        })?;
        let sheet = &mut sheets[slot.sheet];
        let origin = UVec2::new(slot.x, slot.y) * tile_size;
        blit_pattern(&mut sheet.image, pattern, tile_size, origin).ok_or_else(|| Error::Packing {
            reason: format!(
                "tile {tile} does not fit sheet {} at ({}, {})",
                slot.sheet, slot.x, slot.y
            ),
        })?;
    }

    for sheet in &sheets {
        log::debug!(
            "sheet {}: {}x{} px, {} tiles, {}% used",
            sheet.id,
            sheet.image.width(),
            sheet.image.height(),
            sheet.tiles.len(),
            (sheet.fill_ratio() * 100.0) as u32
        );
    }
    log::info!("packed {} unique tiles into {} sheet(s)", table.len(), sheets.len());
    return Ok(PackedSheets { assignment, sheets });
}
