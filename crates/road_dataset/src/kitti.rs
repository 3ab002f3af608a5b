//! Indexing and decoding of the KITTI road layout.
//!
//! Expected structure under a dataset root (usually `data/data_road`):
//!
//! ```text
//! training/image_2/um_000000.png
//! training/gt_image_2/um_road_000000.png
//! training/gt_image_2/um_lane_000000.png   (ignored)
//! testing/image_2/um_000000.png
//! ```

use crate::types::{
    DatasetError, DatasetResult, ImageShape, RoadSample, SampleIndex, BACKGROUND_COLOR,
    ROAD_CLASSES,
};
use image::imageops::FilterType;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TRAINING_IMAGES: &str = "training/image_2";
pub const TRAINING_LABELS: &str = "training/gt_image_2";
pub const TESTING_IMAGES: &str = "testing/image_2";

const ROAD_MARKER: &str = "_road_";

/// List `*.png` files directly under `dir`, sorted by file name.
pub fn list_pngs(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DatasetError::MissingDir {
            path: dir.to_path_buf(),
        });
    }
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_png = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if path.is_file() && is_png {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Map a road ground-truth file name to the image it annotates.
///
/// `um_road_000000.png` -> `um_000000.png`. Lane masks and anything else yield `None`.
pub fn image_name_for_label(label_name: &str) -> Option<String> {
    let pos = label_name.find(ROAD_MARKER)?;
    let mut name = String::with_capacity(label_name.len());
    name.push_str(&label_name[..pos]);
    name.push('_');
    name.push_str(&label_name[pos + ROAD_MARKER.len()..]);
    Some(name)
}

/// Pair every training image under `root` with its road mask.
pub fn index_training(root: &Path) -> DatasetResult<Vec<SampleIndex>> {
    let images_dir = root.join(TRAINING_IMAGES);
    let labels_dir = root.join(TRAINING_LABELS);

    let mut labels_by_image = BTreeMap::new();
    for label in list_pngs(&labels_dir)? {
        let Some(name) = label.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        match image_name_for_label(name) {
            Some(image_name) => {
                labels_by_image.insert(image_name, label.clone());
            }
            None => tracing::trace!(label = %label.display(), "skipping non-road mask"),
        }
    }

    let images = list_pngs(&images_dir)?;
    if images.is_empty() {
        return Err(DatasetError::EmptyDir { path: images_dir });
    }
    let mut indices = Vec::with_capacity(images.len());
    for image_path in images {
        let name = image_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let Some(label_path) = labels_by_image.get(&name).cloned() else {
            return Err(DatasetError::MissingLabel {
                label: labels_dir.join(expected_label_name(&name)),
                image: image_path,
            });
        };
        indices.push(SampleIndex {
            image_path,
            label_path,
        });
    }
    Ok(indices)
}

fn expected_label_name(image_name: &str) -> String {
    match image_name.split_once('_') {
        Some((prefix, rest)) => format!("{prefix}{ROAD_MARKER}{rest}"),
        None => image_name.to_string(),
    }
}

fn open_rgb(path: &Path) -> DatasetResult<image::RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| DatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Decode one sample, resized to `shape`.
///
/// The image is resampled with a triangle filter and scaled to [0, 1]; the mask uses
/// nearest-neighbour so its colors stay exact before being split into background/road.
pub fn load_sample(index: &SampleIndex, shape: ImageShape) -> DatasetResult<RoadSample> {
    let image = open_rgb(&index.image_path)?;
    let gt = open_rgb(&index.label_path)?;

    let image = image::imageops::resize(&image, shape.width, shape.height, FilterType::Triangle);
    let gt = image::imageops::resize(&gt, shape.width, shape.height, FilterType::Nearest);

    let plane = shape.pixels();
    let mut image_chw = vec![0.0f32; 3 * plane];
    for (i, px) in image.pixels().enumerate() {
        for c in 0..3 {
            image_chw[c * plane + i] = px[c] as f32 / 255.0;
        }
    }

    let mut label_chw = vec![0.0f32; ROAD_CLASSES * plane];
    for (i, px) in gt.pixels().enumerate() {
        let background = px.0 == BACKGROUND_COLOR;
        let class = if background { 0 } else { 1 };
        label_chw[class * plane + i] = 1.0;
    }

    Ok(RoadSample {
        image_chw,
        label_chw,
        shape,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn road_masks_map_to_images() {
        assert_eq!(
            image_name_for_label("um_road_000000.png").as_deref(),
            Some("um_000000.png")
        );
        assert_eq!(
            image_name_for_label("umm_road_000093.png").as_deref(),
            Some("umm_000093.png")
        );
        assert_eq!(image_name_for_label("um_lane_000000.png"), None);
    }

    #[test]
    fn expected_label_inserts_marker() {
        assert_eq!(expected_label_name("uu_000010.png"), "uu_road_000010.png");
    }
}
