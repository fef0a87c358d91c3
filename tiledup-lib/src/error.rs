use std::path::{Path, PathBuf};

use glam::UVec2;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can abort a run. None of these are retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The image can't be cut into whole tiles.
    #[error("image of {image_width}x{image_height} px can't be split into {tile_width}x{tile_height} px tiles: {reason}")]
    Dimension {
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
        reason: &'static str,
    },

    #[error("corrupt tile data at grid cell ({}, {}): {reason}", .pos.x, .pos.y)]
    CorruptTile { pos: UVec2, reason: String },

    /// A sheet with the configured limits can't hold even one tile.
    #[error("can't pack tiles: {reason}")]
    Packing { reason: String },

    #[error("export failed at grid cell ({}, {}): {reason}", .pos.x, .pos.y)]
    Export { pos: UVec2, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An output file can't be put in place.
    #[error("can't write {}: {reason}", .path.display())]
    Output { path: PathBuf, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn dimension(image: UVec2, tile: UVec2, reason: &'static str) -> Self {
        return Error::Dimension {
            image_width: image.x,
            image_height: image.y,
            tile_width: tile.x,
            tile_height: tile.y,
            reason,
        };
    }

    pub(crate) fn corrupt(pos: UVec2, reason: impl Into<String>) -> Self {
        return Error::CorruptTile {
            pos,
            reason: reason.into(),
        };
    }

    pub(crate) fn output(path: &Path, reason: impl ToString) -> Self {
        return Error::Output {
            path: path.to_owned(),
            reason: reason.to_string(),
        };
    }
}
