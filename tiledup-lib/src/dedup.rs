use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    iter::zip,
    ops::Index,
};

use glam::UVec2;
use image::RgbaImage;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    slicer::TileBlocks,
    tile::{blit_pattern, pattern_len, IdMap, TileBlock, TileId, U8Pattern},
    utils::UVecVec,
    Area, Grid,
};

/// First 64 bits of the BLAKE3 digest of a tile's pixels.
/// Equal pixels always give equal fingerprints, the reverse is checked byte for byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileFingerprint(pub u64);

impl TileFingerprint {
    pub fn of(pixels: &[u8]) -> Self {
        let digest = blake3::hash(pixels);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        return Self(u64::from_le_bytes(head));
    }
}

impl Display for TileFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Debug for TileFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TileFingerprint({self})")
    }
}

/// The unique tiles of a map, in order of first appearance
#[derive(Clone, Default)]
pub struct UniqueTileTable {
    tile_size: UVec2,
    patterns: IdMap<U8Pattern>,
    fingerprints: IdMap<TileFingerprint>,
    frequencies: IdMap<usize>,
    // more than one id per fingerprint only on a hash collision
    buckets: HashMap<TileFingerprint, Vec<TileId>>,
}

impl Debug for UniqueTileTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueTileTable")
            .field("tile_size", &self.tile_size)
            .field("frequencies", &self.frequencies)
            .field("patterns (len)", &self.patterns.len())
            .finish()
    }
}

impl UniqueTileTable {
    pub fn new(tile_size: UVec2) -> Self {
        return Self {
            tile_size,
            ..Default::default()
        };
    }

    pub fn len(&self) -> usize {
        return self.patterns.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.patterns.is_empty();
    }

    pub fn tile_size(&self) -> UVec2 {
        return self.tile_size;
    }

    pub fn pattern(&self, id: TileId) -> Option<&[u8]> {
        return self.patterns.get(id).map(Vec::as_slice);
    }

    pub fn fingerprint(&self, id: TileId) -> Option<TileFingerprint> {
        return self.fingerprints.get(id).copied();
    }

    /// How many grid cells use tile `id`
    pub fn frequency(&self, id: TileId) -> Option<usize> {
        return self.frequencies.get(id).copied();
    }

    pub fn frequencies(&self) -> &[usize] {
        return &self.frequencies;
    }

    /// `(id, pixels)` in id order
    pub fn iter(&self) -> impl Iterator<Item = (TileId, &[u8])> + '_ {
        return self.patterns.iter().map(Vec::as_slice).enumerate();
    }

    /// Id of a stored tile with exactly these pixels
    pub fn find(&self, fingerprint: TileFingerprint, pixels: &[u8]) -> Option<TileId> {
        return self
            .buckets
            .get(&fingerprint)?
            .iter()
            .copied()
            .find(|&id| self.patterns[id] == pixels);
    }

    /// Returns the id for `pixels`, adding them as a new tile if never seen before.
    /// `fingerprint` must be `TileFingerprint::of(&pixels)`.
    pub(crate) fn intern(&mut self, fingerprint: TileFingerprint, pixels: U8Pattern) -> (TileId, bool) {
        if let Some(id) = self.find(fingerprint, &pixels) {
            self.frequencies[id] += 1;
            return (id, false);
        }
        let id = self.patterns.len();
        let bucket = self.buckets.entry(fingerprint).or_default();
        if !bucket.is_empty() {
            log::warn!(
                "fingerprint {fingerprint} collides with tile(s) {bucket:?}, keeping tile {id} separate"
            );
        }
        bucket.push(id);
        self.patterns.push(pixels);
        self.fingerprints.push(fingerprint);
        self.frequencies.push(1);
        return (id, true);
    }

    /// The tile as a standalone image
    pub fn tile_image(&self, id: TileId) -> Option<RgbaImage> {
        let pattern = self.patterns.get(id)?.clone();
        return RgbaImage::from_raw(self.tile_size.x, self.tile_size.y, pattern);
    }
}

/// The source map as tile ids, one per grid cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMap {
    grid: Grid,
    ids: UVecVec<TileId>,
}

impl GridMap {
    pub fn grid(&self) -> Grid {
        return self.grid;
    }

    pub fn len(&self) -> usize {
        return self.grid.area() as usize;
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn get(&self, pos: UVec2) -> Option<TileId> {
        return self.ids.get(pos).copied();
    }

    /// Ids in row-major order
    pub fn ids(&self) -> impl Iterator<Item = TileId> + '_ {
        return self.ids.iter_cells().copied();
    }

    /// `(grid position, id)` in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (UVec2, TileId)> + '_ {
        return zip(self.grid.iter_locs(), self.ids());
    }
}

impl Index<UVec2> for GridMap {
    type Output = TileId;
    fn index(&self, index: UVec2) -> &Self::Output {
        return &self.ids[index];
    }
}

/// Builds the unique tile table and grid map from blocks fed in slice order.
/// Owns the table exclusively until [`Deduplicator::finish`].
#[derive(Debug)]
pub struct Deduplicator {
    table: UniqueTileTable,
    cells: UVecVec<Option<TileId>>,
    grid: Grid,
}

impl Deduplicator {
    pub fn new(grid: Grid, tile_size: UVec2) -> Self {
        return Self {
            table: UniqueTileTable::new(tile_size),
            cells: UVecVec::filled(grid.0, None),
            grid,
        };
    }

    pub fn push(&mut self, block: TileBlock) -> Result<TileId> {
        let fingerprint = TileFingerprint::of(&block.pixels);
        return self.push_fingerprinted(block, fingerprint);
    }

    pub(crate) fn push_fingerprinted(
        &mut self,
        block: TileBlock,
        fingerprint: TileFingerprint,
    ) -> Result<TileId> {
        let TileBlock { pos, pixels } = block;
        let expected = pattern_len(self.table.tile_size());
        if pixels.len() != expected {
            return Err(Error::corrupt(
                pos,
                format!("block has {} bytes, expected {expected}", pixels.len()),
            ));
        }
        let cell = self
            .cells
            .get_mut(pos)
            .ok_or_else(|| Error::corrupt(pos, "block lies outside the grid"))?;
        if cell.is_some() {
            return Err(Error::corrupt(pos, "grid cell was sliced twice"));
        }

        let (id, new_tile) = self.table.intern(fingerprint, pixels);
        *cell = Some(id);
        if new_tile {
            log::trace!("tile {id} first seen at ({}, {}), fingerprint {fingerprint}", pos.x, pos.y);
        }
        return Ok(id);
    }

    pub fn finish(self) -> Result<(UniqueTileTable, GridMap)> {
        let mut rows = Vec::with_capacity(self.grid.y as usize);
        for (y, row) in self.cells.0.into_iter().enumerate() {
            let ids = row
                .into_iter()
                .enumerate()
                .map(|(x, id)| {
                    id.ok_or_else(|| Error::corrupt(UVec2::new(x as u32, y as u32), "no block for grid cell"))
                })
                .collect::<Result<Vec<TileId>>>()?;
            rows.push(ids);
        }
        let grid_map = GridMap {
            grid: self.grid,
            ids: UVecVec(rows),
        };
        log::info!(
            "{} grid cells reduced to {} unique tiles",
            grid_map.len(),
            self.table.len()
        );
        return Ok((self.table, grid_map));
    }
}

/// Sequential dedup: one block at a time, in slice order
pub fn dedup(blocks: TileBlocks<'_>) -> Result<(UniqueTileTable, GridMap)> {
    let mut dedup = Deduplicator::new(*blocks.grid(), blocks.tile_size());
    for block in blocks {
        dedup.push(block?)?;
    }
    return dedup.finish();
}

/// Fingerprints every block on the rayon pool, then merges them into the table
/// in slice order so ids come out exactly as with [`dedup`]
pub fn dedup_parallel(blocks: TileBlocks<'_>) -> Result<(UniqueTileTable, GridMap)> {
    let mut dedup = Deduplicator::new(*blocks.grid(), blocks.tile_size());
    let blocks: Vec<TileBlock> = blocks.collect::<Result<_>>()?;
    let fingerprints: Vec<TileFingerprint> = blocks
        .par_iter()
        .map(|block| TileFingerprint::of(&block.pixels))
        .collect();
    for (block, fingerprint) in zip(blocks, fingerprints) {
        dedup.push_fingerprinted(block, fingerprint)?;
    }
    return dedup.finish();
}

/// Paints every cell's tile back at its grid position
pub fn rebuild_image(table: &UniqueTileTable, grid_map: &GridMap) -> Result<RgbaImage> {
    let tile_size = table.tile_size();
    let grid = grid_map.grid();
    let mut image = RgbaImage::new(grid.x * tile_size.x, grid.y * tile_size.y);
    for (pos, id) in grid_map.iter() {
        let pattern = table
            .pattern(id)
            .ok_or_else(|| Error::corrupt(pos, format!("grid refers to unknown tile {id}")))?;
        blit_pattern(&mut image, pattern, tile_size, pos * tile_size)
            .ok_or_else(|| Error::corrupt(pos, "tile does not fit the rebuilt image"))?;
    }
    return Ok(image);
}
