use std::path::{Path, PathBuf};

use glam::UVec2;
use image::DynamicImage;

use crate::{
    config::Config,
    dedup::{dedup, dedup_parallel, rebuild_image, GridMap, UniqueTileTable},
    error::{Error, Result},
    exporter::{build_document, map_file_name, sheet_file_name, MapDocument},
    output::StagedOutput,
    packer::{pack, PackedSheets},
    slicer::{pattern_at, slice, SourceImage},
    tile::SheetId,
    Area, Grid,
};

pub const TILES_DIR: &str = "tiles";

/// Everything the in-memory stages produce, ready to be written
#[derive(Debug)]
pub struct Processed {
    pub basename: String,
    pub table: UniqueTileTable,
    pub grid_map: GridMap,
    pub packed: PackedSheets,
    pub document: MapDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetSummary {
    pub id: SheetId,
    pub columns: u32,
    pub rows: u32,
    pub tiles: usize,
    pub fill_ratio: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub grid: Grid,
    pub tile_size: UVec2,
    pub total_tiles: usize,
    pub unique_tiles: usize,
    pub sheets: Vec<SheetSummary>,
    pub written: Vec<PathBuf>,
}

impl RunReport {
    pub fn log(&self) {
        log::info!(
            "{}: {}x{} tiles of {}x{} px, {} unique of {} ({:.1}%)",
            self.input.display(),
            self.grid.x,
            self.grid.y,
            self.tile_size.x,
            self.tile_size.y,
            self.unique_tiles,
            self.total_tiles,
            self.unique_ratio() * 100.0
        );
        for sheet in &self.sheets {
            log::info!(
                "sheet {}: {}x{} tiles holding {}, {}% of sheet used",
                sheet.id,
                sheet.columns,
                sheet.rows,
                sheet.tiles,
                (sheet.fill_ratio * 100.0) as u32
            );
        }
        log::info!(
            "wrote {} files to {}",
            self.written.len(),
            self.output_dir.display()
        );
    }

    /// Unique tiles as a share of all grid cells
    pub fn unique_ratio(&self) -> f32 {
        if self.total_tiles == 0 {
            return 0.0;
        }
        return self.unique_tiles as f32 / self.total_tiles as f32;
    }
}

/// Decodes any format `image` understands, with no cap on the decoded size
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let mut reader = image::io::Reader::open(path)?.with_guessed_format()?;
    // large maps are the point of the tool, the default 512 MiB cap would refuse them
    reader.no_limits();
    let image = reader.decode()?;
    log::info!(
        "loaded {} ({}x{} px, {:?})",
        path.display(),
        image.width(),
        image.height(),
        image.color()
    );
    return Ok(image);
}

/// [`decode_image`], normalised to RGBA8
pub fn load_image(path: &Path) -> Result<SourceImage> {
    return Ok(decode_image(path)?.to_rgba8());
}

/// Slice, dedup, pack and export, all in memory. Nothing touches the disk.
pub fn process(image: &SourceImage, config: &Config, basename: &str) -> Result<Processed> {
    config.validate()?;
    let tile_size = config.tile_size();

    let blocks = slice(image, tile_size)?;
    let (table, grid_map) = if config.parallel {
        dedup_parallel(blocks)?
    } else {
        dedup(blocks)?
    };
    if config.verify {
        verify(image, &table, &grid_map)?;
    }
    let packed = pack(&table, &config.pack_config())?;
    let document = build_document(&grid_map, &packed.assignment, tile_size, basename)?;

    return Ok(Processed {
        basename: basename.to_owned(),
        table,
        grid_map,
        packed,
        document,
    });
}

/// Rebuilds the map from its unique tiles and checks it against the source
pub fn verify(image: &SourceImage, table: &UniqueTileTable, grid_map: &GridMap) -> Result<()> {
    let rebuilt = rebuild_image(table, grid_map)?;
    if rebuilt.dimensions() == image.dimensions() && rebuilt.as_raw() == image.as_raw() {
        log::debug!("rebuilt map matches the source image");
        return Ok(());
    }
    let tile_size = table.tile_size();
    for (pos, id) in grid_map.iter() {
        let source = pattern_at(image, pos, tile_size)?;
        if table.pattern(id) != Some(source.as_slice()) {
            return Err(Error::Export {
                pos,
                reason: format!("tile {id} does not reproduce the source pixels"),
            });
        }
    }
    return Err(Error::Export {
        pos: UVec2::ZERO,
        reason: format!(
            "rebuilt map is {}x{} px but the source is {}x{} px",
            rebuilt.width(),
            rebuilt.height(),
            image.width(),
            image.height()
        ),
    });
}

/// Writes sheets, optional single tiles and the map document into `dir`.
/// Either every file appears or none does.
pub fn write_outputs(processed: &Processed, config: &Config, dir: &Path) -> Result<Vec<PathBuf>> {
    let basename = &processed.basename;
    let export = config.export_config(basename);
    let map_text = processed.document.render(&export)?;

    let mut staged = StagedOutput::new(dir)?;
    for sheet in &processed.packed.sheets {
        staged.write_png(Path::new(&sheet_file_name(basename, sheet.id)), &sheet.image)?;
    }
    if config.export_tiles {
        for (id, _) in processed.table.iter() {
            let image = processed.table.tile_image(id).ok_or_else(|| Error::Export {
                pos: UVec2::ZERO,
                reason: format!("tile {id} can't be turned into an image"),
            })?;
            let path = Path::new(TILES_DIR).join(format!("{basename}_tile_{id}.png"));
            staged.write_png(&path, &image)?;
        }
    }
    staged.write_text(Path::new(&map_file_name(basename, export.format)), &map_text)?;
    let written = staged.commit()?;
    remove_stale_outputs(dir, basename, &written)?;
    return Ok(written);
}

fn numbered(name: &str, prefix: &str) -> bool {
    return name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".png"))
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
}

/// Deletes sheets and single tiles of `basename` left by an earlier run that this run
/// did not write again, so the directory only holds what the new map refers to
pub fn remove_stale_outputs(dir: &Path, basename: &str, written: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let sheet_prefix = format!("{basename}_");
    let tile_prefix = format!("{basename}_tile_");
    let mut candidates = Vec::new();
    for (folder, prefix) in [(dir.to_owned(), &sheet_prefix), (dir.join(TILES_DIR), &tile_prefix)] {
        if !folder.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&folder)? {
            let entry = entry?;
            let is_ours = entry.file_name().to_str().map_or(false, |name| numbered(name, prefix));
            if is_ours && entry.file_type()?.is_file() {
                candidates.push(entry.path());
            }
        }
    }

    let mut removed = Vec::new();
    for path in candidates {
        if written.contains(&path) {
            continue;
        }
        std::fs::remove_file(&path).map_err(|err| Error::output(&path, err))?;
        log::info!("removed stale {}", path.display());
        removed.push(path);
    }
    removed.sort();
    return Ok(removed);
}

/// The whole batch: load, process, write
pub fn run(input: &Path, config: &Config) -> Result<RunReport> {
    config.validate()?;
    let (output_dir, basename) = config.resolve_output(input)?;

    let image = load_image(input)?;
    let processed = process(&image, config, &basename)?;
    let written = write_outputs(&processed, config, &output_dir)?;

    let grid = processed.grid_map.grid();
    let sheets = processed
        .packed
        .sheets
        .iter()
        .map(|sheet| SheetSummary {
            id: sheet.id,
            columns: sheet.layout.columns,
            rows: sheet.layout.rows,
            tiles: sheet.tiles.len(),
            fill_ratio: sheet.fill_ratio(),
        })
        .collect();
    let report = RunReport {
        input: input.to_owned(),
        output_dir,
        grid,
        tile_size: config.tile_size(),
        total_tiles: grid.area() as usize,
        unique_tiles: processed.table.len(),
        sheets,
        written,
    };
    report.log();
    return Ok(report);
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn stripes(tiles: UVec2, tile: u32) -> RgbaImage {
        return RgbaImage::from_fn(tiles.x * tile, tiles.y * tile, |x, y| {
            let band = (x / tile + y / tile) % 2;
            Rgba([band as u8 * 255, 0, 0, 255])
        });
    }

    #[test]
    fn process_runs_every_stage() {
        let image = stripes(UVec2::new(4, 3), 4);
        let config = Config::default().with_tile_size(4).with_max_sheet_tiles(1, 1);
        let processed = process(&image, &config, "s").unwrap();
        assert_eq!(processed.table.len(), 2);
        assert_eq!(processed.packed.sheets.len(), 2);
        assert_eq!(processed.document.cells.len(), 12);
        assert_eq!(processed.document.tilesets[1].first_gid, 2);
    }

    #[test]
    fn verify_accepts_a_faithful_dedup() {
        let image = stripes(UVec2::new(3, 3), 2);
        let config = Config {
            verify: true,
            parallel: true,
            ..Config::default().with_tile_size(2)
        };
        assert!(process(&image, &config, "v").is_ok());
    }

    #[test]
    fn verify_catches_a_wrong_table() {
        let image = stripes(UVec2::new(2, 1), 2);
        let other = RgbaImage::from_pixel(4, 2, Rgba([255, 0, 0, 255]));
        let (table, grid_map) = dedup(slice(&other, UVec2::splat(2)).unwrap()).unwrap();
        let err = verify(&image, &table, &grid_map).unwrap_err();
        assert!(matches!(err, Error::Export { .. }));
    }

    #[test]
    fn invalid_config_stops_before_slicing() {
        let image = stripes(UVec2::new(2, 2), 2);
        let config = Config::default().with_tile_size(0);
        assert!(matches!(process(&image, &config, "x"), Err(Error::Config(_))));
    }

    #[test]
    fn stale_sheets_and_tiles_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path();
        std::fs::create_dir(out.join(TILES_DIR)).unwrap();
        for name in ["m_0.png", "m_1.png", "m_notes.png", "other_3.png", "m_1.txt"] {
            std::fs::write(out.join(name), "old").unwrap();
        }
        for name in ["m_tile_0.png", "m_tile_7.png"] {
            std::fs::write(out.join(TILES_DIR).join(name), "old").unwrap();
        }

        let written = vec![out.join("m_0.png"), out.join(TILES_DIR).join("m_tile_0.png")];
        let removed = remove_stale_outputs(out, "m", &written).unwrap();
        assert_eq!(removed, vec![out.join("m_1.png"), out.join(TILES_DIR).join("m_tile_7.png")]);
        assert!(out.join("m_0.png").exists());
        assert!(out.join("m_notes.png").exists());
        assert!(out.join("other_3.png").exists());
        assert!(out.join("m_1.txt").exists());
    }
}
