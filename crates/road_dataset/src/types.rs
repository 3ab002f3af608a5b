//! Core types, error definitions, and data structures for road_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Number of classes encoded by KITTI road ground truth: background and road.
pub const ROAD_CLASSES: usize = 2;

/// Ground-truth color marking non-road pixels.
pub const BACKGROUND_COLOR: [u8; 3] = [255, 0, 0];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset directory missing: {path}")]
    MissingDir { path: PathBuf },
    #[error("dataset directory is empty: {path}")]
    EmptyDir { path: PathBuf },
    #[error("ground-truth mask missing for image {image}: expected {label}")]
    MissingLabel { image: PathBuf, label: PathBuf },
    #[error("unexpected file counts under {root}: {details}")]
    CountMismatch { root: PathBuf, details: String },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid image shape {height}x{width}: {msg}")]
    InvalidShape {
        height: u32,
        width: u32,
        msg: String,
    },
    #[error("{0}")]
    Other(String),
}

/// Target (height, width) every sample is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }

    /// The VGG backbone halves resolution five times; both sides must survive that exactly.
    pub fn validate(&self) -> DatasetResult<()> {
        if self.height == 0 || self.width == 0 {
            return Err(DatasetError::InvalidShape {
                height: self.height,
                width: self.width,
                msg: "dimensions must be non-zero".to_string(),
            });
        }
        if self.height % 32 != 0 || self.width % 32 != 0 {
            return Err(DatasetError::InvalidShape {
                height: self.height,
                width: self.width,
                msg: "dimensions must be multiples of 32".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::new(160, 576)
    }
}

/// A training image paired with its road ground-truth mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// One decoded, resized sample.
#[derive(Debug, Clone)]
pub struct RoadSample {
    /// Image in CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    /// One-hot label in CHW layout: channel 0 background, channel 1 road.
    pub label_chw: Vec<f32>,
    pub shape: ImageShape,
}

/// Directory counts gathered while validating a dataset root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSummary {
    pub training_images: usize,
    pub training_labels: usize,
    pub testing_images: usize,
    pub warnings: Vec<String>,
}
