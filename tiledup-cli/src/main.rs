use std::{fs::File, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use tiledup_lib::{
    config::{DataEncoding, MapFormat, SheetSizing},
    pipeline, Config,
};

/// Cut a tile map image into unique tiles, pack them into sheets and write a Tiled map
#[derive(Debug, Parser)]
#[command(name = "tiledup", version, about)]
struct Cli {
    /// Source image, any format the `image` crate can decode
    input: PathBuf,

    /// JSON config file, command line flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Square tile size in pixels
    #[arg(short = 't', long, value_name = "PX")]
    tile_size: Option<u32>,

    #[arg(long, value_name = "PX", conflicts_with = "tile_size")]
    tile_width: Option<u32>,

    #[arg(long, value_name = "PX", conflicts_with = "tile_size")]
    tile_height: Option<u32>,

    /// Maximum sheet width in tiles
    #[arg(long, value_name = "TILES")]
    sheet_columns: Option<u32>,

    /// Maximum sheet height in tiles
    #[arg(long, value_name = "TILES")]
    sheet_rows: Option<u32>,

    /// Defaults to a directory named after the input, next to it
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Basename of every written file, defaults to the input file stem
    #[arg(short = 'n', long, value_name = "NAME")]
    name: Option<String>,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    /// Use the smallest halved sheet that still fits the last batch of tiles
    #[arg(long)]
    shrink_last_sheet: bool,

    /// Also write every unique tile as its own PNG
    #[arg(long)]
    tiles: bool,

    /// Fingerprint tiles on all cores
    #[arg(long)]
    parallel: bool,

    /// Rebuild the map from its unique tiles and compare with the input before writing
    #[arg(long)]
    verify: bool,

    /// More logging, repeat for trace output
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Also write the log to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Tmx,
    Json,
}

impl From<FormatArg> for MapFormat {
    fn from(arg: FormatArg) -> Self {
        return match arg {
            FormatArg::Tmx => MapFormat::Tmx,
            FormatArg::Json => MapFormat::Json,
        };
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    Base64,
    Csv,
}

impl From<EncodingArg> for DataEncoding {
    fn from(arg: EncodingArg) -> Self {
        return match arg {
            EncodingArg::Base64 => DataEncoding::Base64,
            EncodingArg::Csv => DataEncoding::Csv,
        };
    }
}

impl Cli {
    fn level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        return match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
    }

    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(size) = self.tile_size {
            config = config.with_tile_size(size);
        }
        if let Some(width) = self.tile_width {
            config.tile_width = width;
        }
        if let Some(height) = self.tile_height {
            config.tile_height = height;
        }
        if let Some(columns) = self.sheet_columns {
            config.max_sheet_width_tiles = columns;
        }
        if let Some(rows) = self.sheet_rows {
            config.max_sheet_height_tiles = rows;
        }
        if self.output_dir.is_some() {
            config.output_directory = self.output_dir.clone();
        }
        if self.name.is_some() {
            config.output_basename = self.name.clone();
        }
        if let Some(format) = self.format {
            config.map_format = format.into();
        }
        if let Some(encoding) = self.encoding {
            config.data_encoding = encoding.into();
        }
        if self.shrink_last_sheet {
            config.sheet_sizing = SheetSizing::Shrink;
        }
        config.export_tiles |= self.tiles;
        config.parallel |= self.parallel;
        config.verify |= self.verify;
        return Ok(config);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    use simplelog::*;
    let level = cli.level();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log_file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }
    CombinedLogger::init(loggers).context("installing the logger")?;
    return Ok(());
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.config()?;
    log::debug!("{config:?}");

    let report = pipeline::run(&cli.input, &config)
        .with_context(|| format!("processing {}", cli.input.display()))?;
    for path in &report.written {
        println!("{}", path.display());
    }
    return Ok(());
}

/// Reports a failed run once, through the logger, which also reaches `--log-file`
fn exit_code(result: Result<()>) -> ExitCode {
    return match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(1)
        }
    };
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli) {
        // no logger to report through
        eprintln!("error: {err:#}");
        return ExitCode::from(1);
    }
    return exit_code(run(&cli));
}
