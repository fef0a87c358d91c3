use std::{fs, path::Path};

use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use tiledup_lib::{
    config::{DataEncoding, MapFormat, SheetSizing},
    exporter::decode_base64_gids,
    pipeline::{decode_image, run},
    Config, Error,
};

/// 8x8 tiles of 8x8 px, three distinct patterns laid out diagonally
fn three_pattern_map() -> RgbaImage {
    return RgbaImage::from_fn(64, 64, |x, y| {
        let (tx, ty) = (x / 8, y / 8);
        let (px, py) = (x % 8, y % 8);
        match (tx + ty) % 3 {
            0 => Rgba([30, 120, 30, 255]),
            1 if (px + py) % 2 == 0 => Rgba([200, 200, 40, 255]),
            1 => Rgba([0, 0, 0, 0]),
            _ if py < 4 => Rgba([40, 40, 220, 255]),
            _ => Rgba([40, 40, 220, 128]),
        }
    });
}

fn write_input(dir: &Path, name: &str, image: &RgbaImage) -> std::path::PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    return path;
}

fn config(out: &Path) -> Config {
    return Config {
        output_directory: Some(out.to_owned()),
        ..Config::default().with_tile_size(8)
    };
}

fn sorted_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    return names;
}

fn layer_data(tmx: &str) -> &str {
    let start = tmx.find("<data encoding=\"base64\">").unwrap() + "<data encoding=\"base64\">".len();
    let end = tmx.find("</data>").unwrap();
    return tmx[start..end].trim();
}

#[test]
fn three_patterns_become_one_sheet_and_a_full_map() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "town.png", &three_pattern_map());
    let out = dir.path().join("out");

    let report = run(&input, &config(&out)).unwrap();
    assert_eq!(report.total_tiles, 64);
    assert_eq!(report.unique_tiles, 3);
    assert_eq!(report.sheets.len(), 1);
    assert_eq!(sorted_entries(&out), vec!["town.tmx", "town_0.png"]);

    let tmx = fs::read_to_string(out.join("town.tmx")).unwrap();
    assert!(tmx.contains(r#"width="8" height="8" tilewidth="8" tileheight="8""#));
    assert!(tmx.contains(r#"<image source="town_0.png" width="128" height="128"/>"#));
    let gids = decode_base64_gids(layer_data(&tmx)).unwrap();
    assert_eq!(gids.len(), 64);
    assert!(gids.iter().all(|gid| (1..=3).contains(gid)));

    let sheet = image::open(out.join("town_0.png")).unwrap().to_rgba8();
    assert_eq!(sheet.dimensions(), (128, 128));
    assert_eq!(sheet.get_pixel(0, 0), &Rgba([30, 120, 30, 255]));
    assert_eq!(sheet.get_pixel(127, 127), &Rgba([0, 0, 0, 0]));
}

#[test]
fn sheets_and_tiles_rebuild_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let source = three_pattern_map();
    let input = write_input(dir.path(), "map.png", &source);
    let out = dir.path().join("out");
    let config = Config {
        max_sheet_width_tiles: 2,
        max_sheet_height_tiles: 1,
        export_tiles: true,
        ..config(&out)
    };

    let report = run(&input, &config).unwrap();
    assert_eq!(report.sheets.len(), 2);
    assert_eq!(
        sorted_entries(&out.join("tiles")),
        vec!["map_tile_0.png", "map_tile_1.png", "map_tile_2.png"]
    );

    let tmx = fs::read_to_string(out.join("map.tmx")).unwrap();
    let gids = decode_base64_gids(layer_data(&tmx)).unwrap();
    let sheets = [
        image::open(out.join("map_0.png")).unwrap().to_rgba8(),
        image::open(out.join("map_1.png")).unwrap().to_rgba8(),
    ];
    // sheet 0 holds gids 1..=2, sheet 1 starts at gid 3
    for (i, gid) in gids.iter().enumerate() {
        let (sheet, local) = if *gid < 3 { (0, gid - 1) } else { (1, gid - 3) };
        let (cx, cy) = ((i % 8) as u32, (i / 8) as u32);
        for py in 0..8 {
            for px in 0..8 {
                assert_eq!(
                    sheets[sheet].get_pixel(local * 8 + px, py),
                    source.get_pixel(cx * 8 + px, cy * 8 + py)
                );
            }
        }
    }
}

#[test]
fn identical_runs_write_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "same.png", &three_pattern_map());
    let a = dir.path().join("a");
    let b = dir.path().join("b");

    run(&input, &config(&a)).unwrap();
    let parallel = Config {
        parallel: true,
        verify: true,
        ..config(&b)
    };
    run(&input, &parallel).unwrap();

    for name in ["same.tmx", "same_0.png"] {
        assert!(fs::read(a.join(name)).unwrap() == fs::read(b.join(name)).unwrap(), "{name} differs");
    }
}

#[test]
fn json_and_csv_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "j.png", &three_pattern_map());

    let json_out = dir.path().join("json");
    let config_json = Config {
        map_format: MapFormat::Json,
        sheet_sizing: SheetSizing::Shrink,
        ..config(&json_out)
    };
    run(&input, &config_json).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(json_out.join("j.tmj")).unwrap()).unwrap();
    assert_eq!(json["layers"][0]["data"].as_array().unwrap().len(), 64);
    // three tiles shrink a 16x16 sheet down to 2x2
    assert_eq!(json["tilesets"][0]["columns"], 2);
    assert_eq!(json["tilesets"][0]["imagewidth"], 16);

    let csv_out = dir.path().join("csv");
    let config_csv = Config {
        data_encoding: DataEncoding::Csv,
        ..config(&csv_out)
    };
    run(&input, &config_csv).unwrap();
    let tmx = fs::read_to_string(csv_out.join("j.tmx")).unwrap();
    assert!(tmx.contains("<data encoding=\"csv\">\n1,2,3,1,2,3,1,2,\n2,3,1,"));
}

#[test]
fn failed_run_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "odd.png", &RgbaImage::new(20, 16));
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let err = run(&input, &config(&out)).unwrap_err();
    assert!(matches!(err, Error::Dimension { image_width: 20, .. }));
    assert!(sorted_entries(&out).is_empty());
}

#[test]
fn rgb_input_is_treated_as_opaque() {
    let dir = tempfile::tempdir().unwrap();
    let rgb = image::RgbImage::from_fn(16, 8, |x, _| image::Rgb([if x < 8 { 10 } else { 20 }, 0, 0]));
    let input = dir.path().join("rgb.png");
    rgb.save(&input).unwrap();
    let out = dir.path().join("out");

    let report = run(&input, &config(&out)).unwrap();
    assert_eq!(report.unique_tiles, 2);
    let sheet = image::open(out.join("rgb_0.png")).unwrap().to_rgba8();
    assert_eq!(sheet.get_pixel(8, 0), &Rgba([20, 0, 0, 255]));
}

#[test]
fn export_tiles_blocked_by_a_file_leaves_no_new_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "m.png", &three_pattern_map());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("tiles"), "in the way").unwrap();
    let config = Config {
        export_tiles: true,
        ..config(&out)
    };

    let err = run(&input, &config).unwrap_err();
    assert!(matches!(err, Error::Output { .. }));
    assert!(err.to_string().contains("m_tile_0.png"));
    assert_eq!(sorted_entries(&out), vec!["tiles"]);
}

#[test]
fn rerun_with_fewer_sheets_drops_the_old_ones() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "m.png", &three_pattern_map());
    let out = dir.path().join("out");
    let many = Config {
        max_sheet_width_tiles: 1,
        max_sheet_height_tiles: 1,
        export_tiles: true,
        ..config(&out)
    };
    run(&input, &many).unwrap();
    assert_eq!(sorted_entries(&out), vec!["m.tmx", "m_0.png", "m_1.png", "m_2.png", "tiles"]);

    run(&input, &config(&out)).unwrap();
    assert_eq!(sorted_entries(&out), vec!["m.tmx", "m_0.png", "tiles"]);
    assert!(sorted_entries(&out.join("tiles")).is_empty());
}

#[test]
fn decodes_maps_past_the_default_memory_limit() {
    // 23200^2 greyscale bytes is just over 512 MiB once decoded
    const SIDE: u32 = 23200;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.png");
    {
        let file = std::io::BufWriter::new(fs::File::create(&path).unwrap());
        let mut encoder = png::Encoder::new(file, SIDE, SIDE);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder.write_header().unwrap();
        let mut stream = writer.stream_writer().unwrap();
        let row = vec![0u8; SIDE as usize];
        for _ in 0..SIDE {
            std::io::Write::write_all(&mut stream, &row).unwrap();
        }
        stream.finish().unwrap();
    }

    let image = decode_image(&path).unwrap();
    assert_eq!((image.width(), image.height()), (SIDE, SIDE));
}
