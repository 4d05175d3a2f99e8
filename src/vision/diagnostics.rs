//! Diagnostic screenshots
//!
//! One PNG per failure, named `{tag}_{YYYYMMDD_HHMMSS}.png`. A numeric suffix
//! keeps names unique when several failures land in the same second.

use std::path::{Path, PathBuf};

use image::ImageFormat;

use super::{Frame, VisionError};

/// Writes timestamped screenshots to a diagnostics directory
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    /// Create a writer for `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the diagnostics directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a frame tagged with `tag`, returning the written path
    pub fn save(&self, frame: &Frame, tag: &str) -> Result<PathBuf, VisionError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| VisionError::Screenshot {
            path: self.dir.clone(),
            message: e.to_string(),
        })?;

        let path = self.unique_path(tag);
        frame
            .image()
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| VisionError::Screenshot {
                path: path.clone(),
                message: e.to_string(),
            })?;

        log::info!("Saved diagnostic screenshot {}", path.display());
        Ok(path)
    }

    fn unique_path(&self, tag: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let tag = sanitize(tag);
        let base = format!("{tag}_{stamp}");

        let mut path = self.dir.join(format!("{base}.png"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{base}_{n}.png"));
            n += 1;
        }
        path
    }
}

/// Keep tags safe to use as a file name
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::time::Instant;

    #[test]
    fn test_saves_uniquely_named_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("diag"));
        let frame = Frame::new(RgbaImage::new(8, 8), Instant::now(), 1);

        let first = diagnostics.save(&frame, "claim_afk_rewards").unwrap();
        let second = diagnostics.save(&frame, "claim_afk_rewards").unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("claim_afk_rewards_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize("buttons/back close"), "buttons_back_close");
    }
}
