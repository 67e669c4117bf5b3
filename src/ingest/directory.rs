//! Local still-image camera.
//!
//! Replays the JPEG files of a local directory in file-name order, wrapping
//! around at the end. Useful for bench runs against recorded scenes. The
//! directory listing is taken once at open time.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{CameraSource, CameraStats, CaptureOptions, CapturedFrame};

pub struct DirectoryCamera {
    root: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
}

impl DirectoryCamera {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&root)
            .with_context(|| format!("failed to list camera directory {}", root.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_jpeg_path(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no JPEG files found in {}", root.display()));
        }
        files.sort();
        log::info!(
            "DirectoryCamera: {} stills in {}",
            files.len(),
            root.display()
        );
        Ok(Self {
            root,
            files,
            cursor: 0,
            frame_count: 0,
        })
    }
}

impl CameraSource for DirectoryCamera {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn capture(&mut self, _options: &CaptureOptions) -> Result<CapturedFrame> {
        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = (self.cursor + 1) % self.files.len();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read still {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("still {} is empty", path.display()));
        }
        self.frame_count += 1;
        Ok(CapturedFrame::Jpeg(bytes))
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.describe(),
        }
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}
