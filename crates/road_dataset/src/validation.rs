//! Dataset layout checks run before training starts.

use crate::kitti::{list_pngs, TESTING_IMAGES, TRAINING_IMAGES, TRAINING_LABELS};
use crate::types::{DatasetError, DatasetResult, LayoutSummary};
use std::path::Path;

/// File counts of the official KITTI road release.
pub const KITTI_TRAINING_IMAGES: usize = 289;
pub const KITTI_TRAINING_LABELS: usize = 289;
pub const KITTI_TESTING_IMAGES: usize = 290;

fn count_checked(root: &Path, rel: &str) -> DatasetResult<usize> {
    let dir = root.join(rel);
    let count = list_pngs(&dir)?.len();
    if count == 0 {
        return Err(DatasetError::EmptyDir { path: dir });
    }
    Ok(count)
}

fn compare(label: &str, observed: usize, expected: usize, warnings: &mut Vec<String>) {
    if observed != expected {
        warnings.push(format!("{label}: found {observed}, expected {expected}"));
    }
}

/// Check that `root` (the `data_road` directory) has the three KITTI image folders.
///
/// Missing or empty folders fail. Counts that differ from the official release only warn,
/// so trimmed or synthetic datasets still train.
pub fn validate_layout(root: &Path) -> DatasetResult<LayoutSummary> {
    validate_layout_with(root, false)
}

/// Like [`validate_layout`]; with `strict` set, any count mismatch is an error.
pub fn validate_layout_with(root: &Path, strict: bool) -> DatasetResult<LayoutSummary> {
    if !root.is_dir() {
        return Err(DatasetError::MissingDir {
            path: root.to_path_buf(),
        });
    }
    let training_images = count_checked(root, TRAINING_IMAGES)?;
    // Lane and road masks live side by side.
    let training_labels = list_pngs(&root.join(TRAINING_LABELS))?
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.contains("_road_"))
        })
        .count();
    if training_labels == 0 {
        return Err(DatasetError::EmptyDir {
            path: root.join(TRAINING_LABELS),
        });
    }
    let testing_images = count_checked(root, TESTING_IMAGES)?;

    let mut warnings = Vec::new();
    compare(
        "training images",
        training_images,
        KITTI_TRAINING_IMAGES,
        &mut warnings,
    );
    compare(
        "training road masks",
        training_labels,
        KITTI_TRAINING_LABELS,
        &mut warnings,
    );
    compare(
        "testing images",
        testing_images,
        KITTI_TESTING_IMAGES,
        &mut warnings,
    );
    if strict && !warnings.is_empty() {
        return Err(DatasetError::CountMismatch {
            root: root.to_path_buf(),
            details: warnings.join("; "),
        });
    }
    for w in &warnings {
        tracing::warn!(root = %root.display(), "{w}");
    }

    Ok(LayoutSummary {
        training_images,
        training_labels,
        testing_images,
        warnings,
    })
}
