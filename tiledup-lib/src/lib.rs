//! Splits a tile based map image into its unique tiles, packs those into texture
//! sheets and writes a Tiled map that rebuilds the original image from them.
//!
//! The stages run strictly in order: load, [`slicer`], [`dedup`], [`packer`],
//! [`exporter`], and finally [`output`] moves the files into place. [`pipeline`]
//! strings them together.

pub mod config;
pub mod dedup;
pub mod error;
pub mod exporter;
pub mod output;
pub mod packer;
pub mod pipeline;
pub mod slicer;
pub mod tile;
pub mod utils;

use derive_more::{Deref, DerefMut, From};
use glam::UVec2;

pub use config::Config;
pub use error::{Error, Result};

pub trait Area {
    type Output;
    fn area(&self) -> Self::Output;
}

impl Area for Grid {
    type Output = u32;

    fn area(&self) -> Self::Output {
        return self.x * self.y;
    }
}

impl Area for UVec2 {
    type Output = u32;

    fn area(&self) -> Self::Output {
        return self.x * self.y;
    }
}

/// Size of a map in tiles
#[derive(Deref, DerefMut, From, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Grid(pub UVec2);

impl Grid {
    /// Every cell, row by row
    pub fn iter_locs(&self) -> UVec2Iter {
        return UVec2Iter::new(UVec2::ZERO, self.0);
    }
}

/// Row-major walk over the half open box `start..end`
#[derive(Clone, Debug)]
pub struct UVec2Iter {
    pub cur: UVec2,
    pub start: UVec2,
    pub end: UVec2,
}

impl UVec2Iter {
    pub fn new(start: UVec2, end: UVec2) -> Self {
        let mut cur = start;
        // an empty row range means there is nothing to walk
        if start.x >= end.x {
            cur.y = end.y.max(start.y);
        }
        return Self { cur, start, end };
    }

    fn remaining(&self) -> usize {
        if self.cur.y >= self.end.y {
            return 0;
        }
        let width = (self.end.x - self.start.x) as usize;
        let full_rows = (self.end.y - self.cur.y - 1) as usize;
        return full_rows * width + (self.end.x - self.cur.x) as usize;
    }
}

impl Iterator for UVec2Iter {
    type Item = UVec2;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur.y >= self.end.y {
            return None;
        }
        let ret = self.cur;
        self.cur.x += 1;
        if self.cur.x == self.end.x {
            self.cur.x = self.start.x;
            self.cur.y += 1;
        }
        return Some(ret);
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        return (n, Some(n));
    }
}

impl ExactSizeIterator for UVec2Iter {}
