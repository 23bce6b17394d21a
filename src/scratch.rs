use crate::preview::frame::PreviewFrame;
use anyhow::{Context, Result};
use chrono::Utc;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};
use serde::Serialize;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reference the host uses to show a scratch image in its own preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScratchImageRef {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Writes preview images into the host's scratch directory under names that
/// never repeat, so host-side caches keyed on filename always miss.
#[derive(Debug)]
pub struct ScratchWriter {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl ScratchWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_batch(&self, frames: &[PreviewFrame]) -> Result<Vec<ScratchImageRef>> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create scratch directory {}", self.dir.display()))?;
        let millis = Utc::now().timestamp_millis();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let filename = format!("watchpoint_{millis}_{seq}_{i}.png");
                write_png(frame, &self.dir.join(&filename))?;
                Ok(ScratchImageRef {
                    filename,
                    subfolder: String::new(),
                    kind: "temp".to_string(),
                })
            })
            .collect()
    }
}

fn write_png(frame: &PreviewFrame, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let image = frame.image();
    PngEncoder::new_with_quality(BufWriter::new(file), CompressionType::Fast, FilterType::Adaptive)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .with_context(|| format!("encode {}", path.display()))
}
