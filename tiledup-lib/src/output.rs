//! All-or-nothing output.
//!
//! Files are first written into a hidden staging directory inside the output
//! directory and only moved to their final names by [`StagedOutput::commit`].
//! Dropping a [`StagedOutput`] without committing deletes everything staged.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{
    codecs::png::{CompressionType, FilterType, PngEncoder},
    ColorType, ImageEncoder, RgbaImage,
};
use tempfile::TempDir;

use crate::error::{Error, Result};

/// PNG encoding with fixed settings so identical images give identical bytes
pub fn encode_png<W: Write>(image: &RgbaImage, writer: W) -> Result<()> {
    let encoder = PngEncoder::new_with_quality(writer, CompressionType::Default, FilterType::NoFilter);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
    return Ok(());
}

#[derive(Debug)]
pub struct StagedOutput {
    staging: TempDir,
    final_dir: PathBuf,
    // relative to both the staging and the final directory
    staged: Vec<PathBuf>,
}

impl StagedOutput {
    pub fn new(final_dir: &Path) -> Result<Self> {
        fs::create_dir_all(final_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".tiledup-")
            .tempdir_in(final_dir)?;
        log::trace!("staging output in {}", staging.path().display());
        return Ok(Self {
            staging,
            final_dir: final_dir.to_owned(),
            staged: Vec::new(),
        });
    }

    pub fn final_dir(&self) -> &Path {
        return &self.final_dir;
    }

    fn stage(&mut self, relative: &Path) -> Result<PathBuf> {
        let path = self.staging.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.staged.push(relative.to_owned());
        return Ok(path);
    }

    pub fn write_png(&mut self, relative: &Path, image: &RgbaImage) -> Result<()> {
        let path = self.stage(relative)?;
        let mut writer = BufWriter::new(File::create(&path)?);
        encode_png(image, &mut writer)?;
        writer.flush()?;
        log::debug!("staged {} ({}x{} px)", relative.display(), image.width(), image.height());
        return Ok(());
    }

    pub fn write_text(&mut self, relative: &Path, text: &str) -> Result<()> {
        let path = self.stage(relative)?;
        fs::write(&path, text)?;
        log::debug!("staged {} ({} bytes)", relative.display(), text.len());
        return Ok(());
    }

    /// Moves every staged file to its final place, replacing older files of the same name.
    /// If any file can't be placed, everything already moved is put back as it was.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        for relative in &self.staged {
            self.check_target(relative)?;
        }

        let mut placed: Vec<Placed> = Vec::with_capacity(self.staged.len());
        let mut created_dirs: Vec<PathBuf> = Vec::new();
        for relative in &self.staged {
            match self.place(relative, &mut created_dirs) {
                Ok(done) => placed.push(done),
                Err(err) => {
                    log::warn!("commit to {} failed, rolling back {} files", self.final_dir.display(), placed.len());
                    roll_back(placed, created_dirs);
                    return Err(err);
                }
            }
        }

        let written: Vec<PathBuf> = placed.into_iter().map(|done| done.target).collect();
        log::debug!("committed {} files to {}", written.len(), self.final_dir.display());
        return Ok(written);
    }

    /// Catches targets that can never be written before anything is moved
    fn check_target(&self, relative: &Path) -> Result<()> {
        let target = self.final_dir.join(relative);
        if target.is_dir() {
            return Err(Error::output(&target, "a directory is in the way"));
        }
        let mut dir = self.final_dir.clone();
        if let Some(parent) = relative.parent() {
            for part in parent.components() {
                dir.push(part);
                if dir.exists() && !dir.is_dir() {
                    return Err(Error::output(&target, format!("{} is not a directory", dir.display())));
                }
            }
        }
        return Ok(());
    }

    fn place(&self, relative: &Path, created_dirs: &mut Vec<PathBuf>) -> Result<Placed> {
        let target = self.final_dir.join(relative);
        if let Some(parent) = target.parent() {
            let mut missing: Vec<PathBuf> = parent
                .ancestors()
                .take_while(|dir| !dir.exists())
                .map(Path::to_path_buf)
                .collect();
            fs::create_dir_all(parent).map_err(|err| Error::output(&target, err))?;
            missing.reverse();
            created_dirs.extend(missing);
        }

        let backup = if target.is_file() {
            let backup = self.staging.path().join(REPLACED_DIR).join(relative);
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent).map_err(|err| Error::output(&target, err))?;
            }
            fs::rename(&target, &backup).map_err(|err| Error::output(&target, err))?;
            Some(backup)
        } else {
            None
        };

        if let Err(err) = fs::rename(self.staging.path().join(relative), &target) {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &target);
            }
            return Err(Error::output(&target, err));
        }
        return Ok(Placed { target, backup });
    }
}

const REPLACED_DIR: &str = ".replaced";

/// A file moved into the output directory, and the older file it replaced
#[derive(Debug)]
struct Placed {
    target: PathBuf,
    backup: Option<PathBuf>,
}

fn roll_back(placed: Vec<Placed>, created_dirs: Vec<PathBuf>) {
    for done in placed.into_iter().rev() {
        if let Err(err) = fs::remove_file(&done.target) {
            log::warn!("can't remove {}: {err}", done.target.display());
        }
        if let Some(backup) = done.backup {
            if let Err(err) = fs::rename(&backup, &done.target) {
                log::warn!("can't restore {}: {err}", done.target.display());
            }
        }
    }
    // innermost first, only empty ones go
    for dir in created_dirs.iter().rev() {
        let _ = fs::remove_dir(dir);
    }
}
