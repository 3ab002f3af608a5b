//! Batch generation for training.

use crate::kitti::{index_training, load_sample};
use crate::types::{DatasetError, DatasetResult, ImageShape, RoadSample, SampleIndex, ROAD_CLASSES};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// A paired (images, labels) host batch. Both arrays are CHW per sample.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub images: Vec<f32>,
    pub labels: Vec<f32>,
    pub len: usize,
    pub shape: ImageShape,
    pub num_classes: usize,
}

impl SampleBatch {
    pub fn new(
        images: Vec<f32>,
        labels: Vec<f32>,
        len: usize,
        shape: ImageShape,
        num_classes: usize,
    ) -> DatasetResult<Self> {
        let plane = shape.pixels();
        if len == 0 {
            return Err(DatasetError::Other("cannot build an empty batch".to_string()));
        }
        if images.len() != len * 3 * plane {
            return Err(DatasetError::Other(format!(
                "image buffer has {} values, expected {} for {len} samples of {}x{}",
                images.len(),
                len * 3 * plane,
                shape.height,
                shape.width
            )));
        }
        if labels.len() != len * num_classes * plane {
            return Err(DatasetError::Other(format!(
                "label buffer has {} values, expected {} for {len} samples with {num_classes} classes",
                labels.len(),
                len * num_classes * plane
            )));
        }
        Ok(Self {
            images,
            labels,
            len,
            shape,
            num_classes,
        })
    }

    pub fn from_samples(samples: Vec<RoadSample>) -> DatasetResult<Self> {
        let Some(first) = samples.first() else {
            return Err(DatasetError::Other("cannot build an empty batch".to_string()));
        };
        let shape = first.shape;
        let len = samples.len();
        let mut images = Vec::with_capacity(len * 3 * shape.pixels());
        let mut labels = Vec::with_capacity(len * ROAD_CLASSES * shape.pixels());
        for sample in samples {
            if sample.shape != shape {
                return Err(DatasetError::Other(
                    "batch contains varying image sizes".to_string(),
                ));
            }
            images.extend_from_slice(&sample.image_chw);
            labels.extend_from_slice(&sample.label_chw);
        }
        Self::new(images, labels, len, shape, ROAD_CLASSES)
    }

    /// Images as `[N, 3, H, W]` and labels as `[N, C, H, W]` on `device`.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let h = self.shape.height as usize;
        let w = self.shape.width as usize;
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(self.images.clone(), [self.len, 3, h, w]),
            device,
        );
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(self.labels.clone(), [self.len, self.num_classes, h, w]),
            device,
        );
        (images, labels)
    }
}

/// Anything that yields one pass of batches at a time.
///
/// `reset` starts a new pass; `next_batch` returns `Ok(None)` once the pass is drained.
pub trait BatchSource {
    fn reset(&mut self, batch_size: usize) -> DatasetResult<()>;
    fn next_batch(&mut self) -> DatasetResult<Option<SampleBatch>>;
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub shape: ImageShape,
    /// Shuffle sample order at the start of every pass.
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Emit a progress event every N samples; `None` disables it.
    pub log_every_samples: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            shape: ImageShape::default(),
            shuffle: true,
            seed: None,
            log_every_samples: Some(100),
        }
    }
}

/// Batch generator over the KITTI road training split.
pub struct KittiBatches {
    indices: Vec<SampleIndex>,
    cfg: BatchConfig,
    rng: StdRng,
    cursor: usize,
    batch_size: usize,
    processed_samples: usize,
    last_logged_samples: usize,
    total_load_time: Duration,
}

impl KittiBatches {
    /// Index `root` (the `data_road` directory) and prepare a generator.
    pub fn from_root(root: &Path, cfg: BatchConfig) -> DatasetResult<Self> {
        let indices = index_training(root)?;
        Self::from_indices(indices, cfg)
    }

    pub fn from_indices(indices: Vec<SampleIndex>, cfg: BatchConfig) -> DatasetResult<Self> {
        cfg.shape.validate()?;
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Self {
            indices,
            cfg,
            rng,
            cursor: 0,
            batch_size: 1,
            processed_samples: 0,
            last_logged_samples: 0,
            total_load_time: Duration::ZERO,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of batches one pass yields for `batch_size`, counting a partial last batch.
    pub fn batches_per_pass(&self, batch_size: usize) -> usize {
        self.indices.len().div_ceil(batch_size.max(1))
    }

    pub fn indices(&self) -> &[SampleIndex] {
        &self.indices
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.cfg.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < threshold {
            return;
        }
        tracing::debug!(
            samples = self.processed_samples,
            load_ms = self.total_load_time.as_secs_f64() * 1000.0,
            "dataset progress"
        );
        self.last_logged_samples = self.processed_samples;
    }
}

impl BatchSource for KittiBatches {
    fn reset(&mut self, batch_size: usize) -> DatasetResult<()> {
        self.batch_size = batch_size.max(1);
        self.cursor = 0;
        if self.cfg.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
        Ok(())
    }

    fn next_batch(&mut self) -> DatasetResult<Option<SampleBatch>> {
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let shape = self.cfg.shape;

        let t_load = Instant::now();
        let samples = self.indices[self.cursor..end]
            .par_iter()
            .map(|idx| load_sample(idx, shape))
            .collect::<DatasetResult<Vec<_>>>()?;
        self.total_load_time += t_load.elapsed();
        self.cursor = end;

        let batch = SampleBatch::from_samples(samples)?;
        self.processed_samples += batch.len;
        self.maybe_log_progress();
        Ok(Some(batch))
    }
}
