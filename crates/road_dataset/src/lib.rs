//! KITTI road dataset utilities for FCN training.
//!
//! This crate provides:
//! - Layout validation of a `data_road` directory
//! - Image/ground-truth pairing and one-hot label decoding
//! - A shuffling batch generator that feeds the training loop

pub mod batch;
pub mod kitti;
pub mod types;
pub mod validation;

pub use batch::{BatchConfig, BatchSource, KittiBatches, SampleBatch};
pub use kitti::{image_name_for_label, index_training, load_sample};
pub use types::*;
pub use validation::{validate_layout, validate_layout_with};
