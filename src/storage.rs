//! Image persistence for captured beans.
//!
//! Files are named `bean_{bean_id:06}_pos{position}_{millis}.{ext}` under one base
//! directory. The millisecond stamp is what keeps repeated captures of the same bean
//! at the same position apart, so the store never hands out the same stamp twice and
//! skips any stamp whose file already exists on disk.

use crate::camera::{Frame, ImageArtifact, PixelLayout};
use crate::error::{BridgeError, BridgeResult, CaptureFault};
use crate::protocol::CaptureRequest;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Encoded file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// Baseline JPEG
    Jpeg,
    /// Lossless PNG
    Png,
}

impl StorageFormat {
    /// Parse the configuration name ("jpeg" or "png")
    pub fn from_name(name: &str) -> BridgeResult<Self> {
        match name {
            "jpeg" | "jpg" => Ok(StorageFormat::Jpeg),
            "png" => Ok(StorageFormat::Png),
            other => Err(BridgeError::Configuration(format!(
                "unsupported storage format '{other}'"
            ))),
        }
    }

    /// File extension
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Jpeg => "jpg",
            StorageFormat::Png => "png",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            StorageFormat::Jpeg => ImageFormat::Jpeg,
            StorageFormat::Png => ImageFormat::Png,
        }
    }
}

/// Writes captured frames to disk under collision-free names.
#[derive(Debug)]
pub struct ImageStore {
    base_dir: PathBuf,
    format: StorageFormat,
    last_stamp_ms: Option<i64>,
}

impl ImageStore {
    /// Create the store, creating `base_dir` if needed.
    pub fn new(base_dir: impl Into<PathBuf>, format: StorageFormat) -> BridgeResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| {
            BridgeError::Storage(format!(
                "cannot create image directory {}: {e}",
                base_dir.display()
            ))
        })?;
        Ok(Self {
            base_dir,
            format,
            last_stamp_ms: None,
        })
    }

    /// Directory receiving images
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// File name for a capture at `stamp_ms`
    pub fn file_name(&self, request: &CaptureRequest, stamp_ms: i64) -> String {
        format!(
            "bean_{:06}_pos{}_{}.{}",
            request.bean_id,
            request.position,
            stamp_ms,
            self.format.extension()
        )
    }

    /// Reserve a unique path for `request`, stamped no earlier than `now`.
    ///
    /// Stamps strictly increase within one store, and a stamp whose file already
    /// exists (left by an earlier run) is skipped.
    pub fn reserve_path(
        &mut self,
        request: &CaptureRequest,
        now: DateTime<Utc>,
    ) -> (PathBuf, DateTime<Utc>) {
        let mut stamp = now.timestamp_millis();
        if let Some(last) = self.last_stamp_ms {
            stamp = stamp.max(last + 1);
        }
        let mut path = self.base_dir.join(self.file_name(request, stamp));
        while path.exists() {
            stamp += 1;
            path = self.base_dir.join(self.file_name(request, stamp));
        }
        self.last_stamp_ms = Some(stamp);

        let captured_at = Utc.timestamp_millis_opt(stamp).single().unwrap_or(now);
        (path, captured_at)
    }

    /// Encode `frame` and write it under a fresh name.
    ///
    /// The frame must already be in RGB order. Encoding runs on the blocking pool.
    pub async fn persist(
        &mut self,
        request: &CaptureRequest,
        frame: Frame,
    ) -> Result<ImageArtifact, CaptureFault> {
        if frame.layout != PixelLayout::Rgb8 {
            return Err(CaptureFault::Persist(
                "frame must be converted to RGB before encoding".to_string(),
            ));
        }

        let (path, captured_at) = self.reserve_path(request, Utc::now());
        let format = self.format;
        let target = path.clone();

        tokio::task::spawn_blocking(move || encode(frame, &target, format))
            .await
            .map_err(|e| CaptureFault::Persist(format!("encoder task failed: {e}")))??;

        debug!(path = %path.display(), "Image written");
        Ok(ImageArtifact {
            path,
            captured_at,
            bean_id: request.bean_id,
            position: request.position,
        })
    }
}

fn encode(frame: Frame, path: &Path, format: StorageFormat) -> Result<(), CaptureFault> {
    let (width, height) = (frame.width, frame.height);
    let image = RgbImage::from_raw(width, height, frame.data).ok_or_else(|| {
        CaptureFault::Persist(format!("buffer does not fit a {width}x{height} image"))
    })?;
    image
        .save_with_format(path, format.image_format())
        .map_err(|e| CaptureFault::Persist(format!("{}: {e}", path.display())))
}
