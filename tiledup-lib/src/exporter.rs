//! Tiled map output.
//!
//! Every sheet becomes one tileset. A cell's global tile id is the `firstgid` of its
//! sheet plus the tile's index on that sheet; sheets follow each other in the gid
//! space by their full capacity, so gid 0 (no tile) is never written.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use glam::UVec2;
use serde::Serialize;

use crate::{
    config::{DataEncoding, ExportConfig, MapFormat},
    dedup::GridMap,
    error::{Error, Result},
    packer::SheetAssignment,
    tile::SheetId,
    Grid,
};

const TMX_VERSION: &str = "1.10";
const INDENT: &str = "    ";
/// Tiled keeps the top three gid bits for flip and rotation flags
pub const MAX_GID: u32 = 0x1FFF_FFFF;

/// A sheet texture as the map refers to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilesetRef {
    pub name: String,
    /// path of the sheet image, relative to the map file
    pub image: String,
    pub image_size: UVec2,
    pub columns: u32,
    pub tile_count: u32,
    pub first_gid: u32,
}

/// What one grid cell shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub sheet: SheetId,
    pub local: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDocument {
    pub grid: Grid,
    pub tile_size: UVec2,
    pub layer_name: String,
    pub tilesets: Vec<TilesetRef>,
    /// row-major, one per grid cell
    pub cells: Vec<CellRef>,
}

pub fn sheet_name(basename: &str, sheet: SheetId) -> String {
    return format!("{basename}_{sheet}");
}

pub fn sheet_file_name(basename: &str, sheet: SheetId) -> String {
    return format!("{}.png", sheet_name(basename, sheet));
}

pub fn map_file_name(basename: &str, format: MapFormat) -> String {
    return format!("{basename}.{}", format.extension());
}

/// Resolves every grid cell to its sheet and sheet-local index
pub fn build_document(
    grid_map: &GridMap,
    assignment: &SheetAssignment,
    tile_size: UVec2,
    basename: &str,
) -> Result<MapDocument> {
    let mut tilesets = Vec::with_capacity(assignment.layouts().len());
    let mut first_gid: u32 = 1;
    for (sheet, layout) in assignment.layouts().iter().enumerate() {
        let too_big = || Error::Export {
            pos: UVec2::ZERO,
            reason: format!("sheet {sheet} pushes tile gids past {MAX_GID:#x}"),
        };
        let image_size = layout.pixel_size(tile_size).ok_or_else(too_big)?;
        let tile_count = u32::try_from(layout.capacity()).map_err(|_| too_big())?;
        tilesets.push(TilesetRef {
            name: sheet_name(basename, sheet),
            image: sheet_file_name(basename, sheet),
            image_size,
            columns: layout.columns,
            tile_count,
            first_gid,
        });
        // the next first gid may sit one past the last usable gid
        first_gid = first_gid
            .checked_add(tile_count)
            .filter(|&next| next - 1 <= MAX_GID)
            .ok_or_else(too_big)?;
    }

    let cells = grid_map
        .iter()
        .map(|(pos, id)| {
            let (sheet, local) = assignment.sheet_local(id).ok_or_else(|| Error::Export {
                pos,
                reason: format!("tile {id} has no slot on any sheet"),
            })?;
            Ok(CellRef { sheet, local })
        })
        .collect::<Result<Vec<CellRef>>>()?;

    return Ok(MapDocument {
        grid: grid_map.grid(),
        tile_size,
        layer_name: basename.to_owned(),
        tilesets,
        cells,
    });
}

impl MapDocument {
    pub fn gid(&self, cell: &CellRef) -> u32 {
        return self.tilesets[cell.sheet].first_gid + cell.local;
    }

    pub fn gids(&self) -> Vec<u32> {
        return self.cells.iter().map(|cell| self.gid(cell)).collect();
    }

    pub fn render(&self, config: &ExportConfig) -> Result<String> {
        return match config.format {
            MapFormat::Tmx => Ok(self.to_tmx(config.encoding)),
            MapFormat::Json => self.to_json(),
        };
    }

    /// Tiled XML map, four space indented
    pub fn to_tmx(&self, encoding: DataEncoding) -> String {
        let mut out = String::new();
        let mut line = |depth: usize, text: String| {
            out.push_str(&INDENT.repeat(depth));
            out.push_str(&text);
            out.push('\n');
        };

        line(0, r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_owned());
        line(
            0,
            format!(
                r#"<map version="{TMX_VERSION}" orientation="orthogonal" renderorder="right-down" width="{}" height="{}" tilewidth="{}" tileheight="{}" infinite="0" nextlayerid="2" nextobjectid="1">"#,
                self.grid.x, self.grid.y, self.tile_size.x, self.tile_size.y
            ),
        );
        for tileset in &self.tilesets {
            line(
                1,
                format!(
                    r#"<tileset firstgid="{}" name="{}" tilewidth="{}" tileheight="{}" tilecount="{}" columns="{}">"#,
                    tileset.first_gid,
                    escape_xml(&tileset.name),
                    self.tile_size.x,
                    self.tile_size.y,
                    tileset.tile_count,
                    tileset.columns
                ),
            );
            line(
                2,
                format!(
                    r#"<image source="{}" width="{}" height="{}"/>"#,
                    escape_xml(&tileset.image),
                    tileset.image_size.x,
                    tileset.image_size.y
                ),
            );
            line(1, "</tileset>".to_owned());
        }
        line(
            1,
            format!(
                r#"<layer id="1" name="{}" width="{}" height="{}">"#,
                escape_xml(&self.layer_name),
                self.grid.x,
                self.grid.y
            ),
        );

        let gids = self.gids();
        match encoding {
            DataEncoding::Base64 => {
                line(2, r#"<data encoding="base64">"#.to_owned());
                line(3, encode_base64_gids(&gids));
            }
            DataEncoding::Csv => {
                line(2, r#"<data encoding="csv">"#.to_owned());
                let width = (self.grid.x as usize).max(1);
                let rows: Vec<String> = gids
                    .chunks(width)
                    .map(|row| row.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
                    .collect();
                line(0, rows.join(",\n"));
            }
        }
        line(2, "</data>".to_owned());
        line(1, "</layer>".to_owned());
        line(0, "</map>".to_owned());
        return out;
    }

    /// Tiled JSON map
    pub fn to_json(&self) -> Result<String> {
        let map = TmjMap {
            kind: "map",
            version: TMX_VERSION,
            orientation: "orthogonal",
            renderorder: "right-down",
            width: self.grid.x,
            height: self.grid.y,
            tilewidth: self.tile_size.x,
            tileheight: self.tile_size.y,
            infinite: false,
            nextlayerid: 2,
            nextobjectid: 1,
            layers: vec![TmjLayer {
                id: 1,
                name: &self.layer_name,
                kind: "tilelayer",
                x: 0,
                y: 0,
                width: self.grid.x,
                height: self.grid.y,
                opacity: 1.0,
                visible: true,
                data: self.gids(),
            }],
            tilesets: self
                .tilesets
                .iter()
                .map(|tileset| TmjTileset {
                    firstgid: tileset.first_gid,
                    name: &tileset.name,
                    image: &tileset.image,
                    imagewidth: tileset.image_size.x,
                    imageheight: tileset.image_size.y,
                    tilewidth: self.tile_size.x,
                    tileheight: self.tile_size.y,
                    tilecount: tileset.tile_count,
                    columns: tileset.columns,
                    margin: 0,
                    spacing: 0,
                })
                .collect(),
        };
        let mut json = serde_json::to_string_pretty(&map)?;
        json.push('\n');
        return Ok(json);
    }
}

#[derive(Serialize)]
struct TmjMap<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    version: &'static str,
    orientation: &'static str,
    renderorder: &'static str,
    width: u32,
    height: u32,
    tilewidth: u32,
    tileheight: u32,
    infinite: bool,
    nextlayerid: u32,
    nextobjectid: u32,
    layers: Vec<TmjLayer<'a>>,
    tilesets: Vec<TmjTileset<'a>>,
}

#[derive(Serialize)]
struct TmjLayer<'a> {
    id: u32,
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    opacity: f32,
    visible: bool,
    data: Vec<u32>,
}

#[derive(Serialize)]
struct TmjTileset<'a> {
    firstgid: u32,
    name: &'a str,
    image: &'a str,
    imagewidth: u32,
    imageheight: u32,
    tilewidth: u32,
    tileheight: u32,
    tilecount: u32,
    columns: u32,
    margin: u32,
    spacing: u32,
}

/// Gids as little endian u32s, base64 encoded
pub fn encode_base64_gids(gids: &[u32]) -> String {
    let bytes: Vec<u8> = gids.iter().flat_map(|gid| gid.to_le_bytes()).collect();
    return STANDARD.encode(bytes);
}

/// Reads back the payload of a base64 encoded, uncompressed TMX layer
pub fn decode_base64_gids(data: &str) -> Result<Vec<u32>> {
    let bytes = STANDARD.decode(data.trim()).map_err(|err| Error::Export {
        pos: UVec2::ZERO,
        reason: format!("layer data is not valid base64: {err}"),
    })?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Export {
            pos: UVec2::ZERO,
            reason: format!("layer data has {} bytes, not a whole number of gids", bytes.len()),
        });
    }
    return Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect());
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    return out;
}
