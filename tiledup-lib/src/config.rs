use std::path::{Path, PathBuf};

use derive_more::IsVariant;
use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const TILE_SIZE_DEFAULT: u32 = 32;
pub const SHEET_TILES_DEFAULT: u32 = 16;

/// How big the last, partly filled sheet is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IsVariant, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetSizing {
    /// every sheet uses the maximum layout
    #[default]
    Fixed,
    /// the last sheet is halved until it would no longer fit its tiles
    Shrink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IsVariant, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapFormat {
    /// Tiled XML map (.tmx)
    #[default]
    Tmx,
    /// Tiled JSON map (.tmj)
    Json,
}

impl MapFormat {
    pub fn extension(&self) -> &'static str {
        return match self {
            MapFormat::Tmx => "tmx",
            MapFormat::Json => "tmj",
        };
    }
}

/// Encoding of the tile layer in a TMX document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IsVariant, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    /// little endian u32 gids, base64 encoded, uncompressed
    #[default]
    Base64,
    Csv,
}

/// Everything a run needs, handed explicitly to each stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tile_width: u32,
    pub tile_height: u32,
    pub max_sheet_width_tiles: u32,
    pub max_sheet_height_tiles: u32,
    pub sheet_sizing: SheetSizing,
    /// defaults to a directory named after the input, next to it
    pub output_directory: Option<PathBuf>,
    /// defaults to the input file stem
    pub output_basename: Option<String>,
    pub map_format: MapFormat,
    pub data_encoding: DataEncoding,
    pub export_tiles: bool,
    pub parallel: bool,
    pub verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            tile_width: TILE_SIZE_DEFAULT,
            tile_height: TILE_SIZE_DEFAULT,
            max_sheet_width_tiles: SHEET_TILES_DEFAULT,
            max_sheet_height_tiles: SHEET_TILES_DEFAULT,
            sheet_sizing: SheetSizing::default(),
            output_directory: None,
            output_basename: None,
            map_format: MapFormat::default(),
            data_encoding: DataEncoding::default(),
            export_tiles: false,
            parallel: false,
            verify: false,
        };
    }
}

/// The part of [`Config`] the packer cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackConfig {
    pub max_sheet_tiles: UVec2,
    pub sizing: SheetSizing,
}

/// The part of [`Config`] the exporter cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub basename: String,
    pub format: MapFormat,
    pub encoding: DataEncoding,
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("can't read config file {}: {err}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&text)?;
        return Ok(config);
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_width = tile_size;
        self.tile_height = tile_size;
        return self;
    }

    pub fn with_max_sheet_tiles(mut self, width: u32, height: u32) -> Self {
        self.max_sheet_width_tiles = width;
        self.max_sheet_height_tiles = height;
        return self;
    }

    pub fn tile_size(&self) -> UVec2 {
        return UVec2::new(self.tile_width, self.tile_height);
    }

    pub fn pack_config(&self) -> PackConfig {
        return PackConfig {
            max_sheet_tiles: UVec2::new(self.max_sheet_width_tiles, self.max_sheet_height_tiles),
            sizing: self.sheet_sizing,
        };
    }

    pub fn export_config(&self, basename: &str) -> ExportConfig {
        return ExportConfig {
            basename: basename.to_owned(),
            format: self.map_format,
            encoding: self.data_encoding,
        };
    }

    /// Catches bad settings before any stage runs
    pub fn validate(&self) -> Result<()> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(Error::Config(format!(
                "tile size must be non-zero, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if self.max_sheet_width_tiles == 0 || self.max_sheet_height_tiles == 0 {
            return Err(Error::Config(format!(
                "sheets must hold at least one tile, got {}x{} tiles",
                self.max_sheet_width_tiles, self.max_sheet_height_tiles
            )));
        }
        if let Some(name) = &self.output_basename {
            validate_basename(name)?;
        }
        return Ok(());
    }

    /// Output directory and basename, falling back to names derived from the input path
    pub fn resolve_output(&self, input: &Path) -> Result<(PathBuf, String)> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_owned);
        let basename = match (&self.output_basename, stem) {
            (Some(name), _) => name.clone(),
            (None, Some(stem)) => stem,
            (None, None) => {
                return Err(Error::Config(format!(
                    "can't derive an output name from {}",
                    input.display()
                )))
            }
        };
        validate_basename(&basename)?;
        let dir = match &self.output_directory {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&basename),
        };
        return Ok((dir, basename));
    }
}

fn validate_basename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("output basename is empty".to_owned()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::Config(format!(
            "output basename `{name}` must be a plain file name"
        )));
    }
    return Ok(());
}
