//! VGG16 feature extractor and its on-disk format.
//!
//! Shapes (NCHW):
//! - `image_input`: `[N, 3, H, W]`
//! - `layer3_out` (pool3): `[N, C3, H/8, W/8]`
//! - `layer4_out` (pool4): `[N, C4, H/16, W/16]`
//! - `layer7_out` (fc7 as convolution): `[N, C7, H/32, W/32]`

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag a saved backbone must carry to be accepted by [`load_vgg`].
pub const VGG_TAG: &str = "vgg16";
pub const MANIFEST_FILE: &str = "saved_model.json";
pub const WEIGHTS_FILE: &str = "variables/variables.bin";

/// Fixed names of the handles exposed by [`BackboneTaps`], in order.
pub const TAP_NAMES: [&str; 5] = [
    "image_input",
    "keep_prob",
    "layer3_out",
    "layer4_out",
    "layer7_out",
];

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("pretrained model directory not found: {path}")]
    MissingModel { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest parse error at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("saved model at {path} has tags {found:?}; expected {expected:?}")]
    TagMismatch {
        path: PathBuf,
        expected: String,
        found: Vec<String>,
    },
    #[error("invalid backbone config: {0}")]
    Config(String),
    #[error("failed to load weights from {path}: {msg}")]
    Weights { path: PathBuf, msg: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VggConfig {
    pub in_channels: usize,
    /// Output channels of the five convolution blocks.
    pub block_channels: [usize; 5],
    /// Width of the fc6/fc7 layers, run as convolutions.
    pub fc_channels: usize,
    /// Kernel of fc6. Must be odd so "same" padding keeps the resolution.
    pub fc6_kernel: usize,
}

impl Default for VggConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            block_channels: [64, 128, 256, 512, 512],
            fc_channels: 4096,
            fc6_kernel: 7,
        }
    }
}

impl VggConfig {
    /// Same topology with narrow layers, for CPU smoke runs and tests.
    pub fn tiny() -> Self {
        Self {
            in_channels: 3,
            block_channels: [4, 8, 8, 16, 16],
            fc_channels: 16,
            fc6_kernel: 3,
        }
    }

    /// Conv layers per block (2, 2, 3, 3, 3).
    pub const CONVS_PER_BLOCK: [usize; 5] = [2, 2, 3, 3, 3];

    pub fn validate(&self) -> Result<(), BackboneError> {
        if self.in_channels == 0 || self.fc_channels == 0 {
            return Err(BackboneError::Config(
                "channel counts must be non-zero".to_string(),
            ));
        }
        if self.block_channels.contains(&0) {
            return Err(BackboneError::Config(
                "block channels must be non-zero".to_string(),
            ));
        }
        if self.fc6_kernel % 2 == 0 {
            return Err(BackboneError::Config(format!(
                "fc6 kernel {} must be odd",
                self.fc6_kernel
            )));
        }
        Ok(())
    }

    pub fn layer3_channels(&self) -> usize {
        self.block_channels[2]
    }

    pub fn layer4_channels(&self) -> usize {
        self.block_channels[3]
    }

    pub fn layer7_channels(&self) -> usize {
        self.fc_channels
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg16<B>, BackboneError> {
        self.validate()?;
        let mut in_ch = self.in_channels;
        let mut blocks = Vec::with_capacity(5);
        for (out_ch, convs) in self
            .block_channels
            .iter()
            .copied()
            .zip(Self::CONVS_PER_BLOCK)
        {
            blocks.push(VggBlock::new(in_ch, out_ch, convs, device));
            in_ch = out_ch;
        }
        let fc6 = Conv2dConfig::new([in_ch, self.fc_channels], [self.fc6_kernel; 2])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let fc7 = Conv2dConfig::new([self.fc_channels, self.fc_channels], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        Ok(Vgg16 {
            blocks,
            fc6,
            fc7,
            config: Ignored(self.clone()),
        })
    }
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    fn new(in_ch: usize, out_ch: usize, convs: usize, device: &B::Device) -> Self {
        let convs = (0..convs)
            .map(|i| {
                let c_in = if i == 0 { in_ch } else { out_ch };
                Conv2dConfig::new([c_in, out_ch], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { convs, pool }
    }

    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    fc6: Conv2d<B>,
    fc7: Conv2d<B>,
    pub config: Ignored<VggConfig>,
}

/// The five named handles a backbone pass produces.
#[derive(Debug, Clone)]
pub struct BackboneTaps<B: Backend> {
    pub image_input: Tensor<B, 4>,
    pub keep_prob: Tensor<B, 1>,
    pub layer3_out: Tensor<B, 4>,
    pub layer4_out: Tensor<B, 4>,
    pub layer7_out: Tensor<B, 4>,
}

impl<B: Backend> BackboneTaps<B> {
    /// `(name, shape)` for every handle, in [`TAP_NAMES`] order.
    pub fn handles(&self) -> Vec<(&'static str, Vec<usize>)> {
        let shapes = [
            self.image_input.dims().to_vec(),
            self.keep_prob.dims().to_vec(),
            self.layer3_out.dims().to_vec(),
            self.layer4_out.dims().to_vec(),
            self.layer7_out.dims().to_vec(),
        ];
        TAP_NAMES.into_iter().zip(shapes).collect()
    }
}

impl<B: Backend> Vgg16<B> {
    pub fn forward(&self, image_input: Tensor<B, 4>, keep_prob: f64) -> BackboneTaps<B> {
        let device = image_input.device();
        let mut x = image_input.clone();
        let mut taps = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            x = block.forward(x);
            taps.push(x.clone());
        }
        let layer3_out = taps[2].clone();
        let layer4_out = taps[3].clone();

        let x = dropout(relu(self.fc6.forward(x)), keep_prob);
        let layer7_out = dropout(relu(self.fc7.forward(x)), keep_prob);

        BackboneTaps {
            image_input,
            keep_prob: Tensor::from_data(TensorData::new(vec![keep_prob as f32], [1]), &device),
            layer3_out,
            layer4_out,
            layer7_out,
        }
    }
}

/// Inverted dropout keeping each activation with probability `keep_prob`.
///
/// Only active while gradients are tracked, so inference passes are deterministic.
fn dropout<B: Backend>(x: Tensor<B, 4>, keep_prob: f64) -> Tensor<B, 4> {
    if !B::ad_enabled() || keep_prob >= 1.0 {
        return x;
    }
    let keep_prob = keep_prob.max(f64::EPSILON);
    let mask = Tensor::<B, 4>::random(x.shape(), Distribution::Bernoulli(keep_prob), &x.device());
    x * mask / keep_prob
}

/// Contents of `saved_model.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModelManifest {
    pub tags: Vec<String>,
    pub backbone: VggConfig,
    /// Weights record, relative to the model directory.
    pub weights: String,
}

/// Load a saved backbone from `vgg_path`.
pub fn load_vgg<B: Backend>(vgg_path: &Path, device: &B::Device) -> Result<Vgg16<B>, BackboneError> {
    if !vgg_path.is_dir() {
        return Err(BackboneError::MissingModel {
            path: vgg_path.to_path_buf(),
        });
    }
    let manifest_path = vgg_path.join(MANIFEST_FILE);
    let raw = fs::read(&manifest_path).map_err(|e| BackboneError::Io {
        path: manifest_path.clone(),
        source: e,
    })?;
    let manifest: SavedModelManifest =
        serde_json::from_slice(&raw).map_err(|e| BackboneError::Manifest {
            path: manifest_path.clone(),
            source: e,
        })?;
    if !manifest.tags.iter().any(|t| t == VGG_TAG) {
        return Err(BackboneError::TagMismatch {
            path: manifest_path,
            expected: VGG_TAG.to_string(),
            found: manifest.tags,
        });
    }

    let weights_path = vgg_path.join(&manifest.weights);
    if !weights_path.is_file() {
        return Err(BackboneError::Weights {
            path: weights_path,
            msg: "file not found".to_string(),
        });
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = manifest
        .backbone
        .init::<B>(device)?
        .load_file(weights_path.clone(), &recorder, device)
        .map_err(|e| BackboneError::Weights {
            path: weights_path.clone(),
            msg: e.to_string(),
        })?;
    tracing::info!(path = %vgg_path.display(), "loaded pretrained backbone");
    Ok(model)
}

/// Write `model` to `dir` in the layout [`load_vgg`] reads.
pub fn save_vgg<B: Backend>(model: &Vgg16<B>, dir: &Path) -> Result<(), BackboneError> {
    let weights_path = dir.join(WEIGHTS_FILE);
    if let Some(parent) = weights_path.parent() {
        fs::create_dir_all(parent).map_err(|e| BackboneError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let manifest = SavedModelManifest {
        tags: vec![VGG_TAG.to_string()],
        backbone: model.config.0.clone(),
        weights: WEIGHTS_FILE.to_string(),
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| BackboneError::Manifest {
        path: manifest_path.clone(),
        source: e,
    })?;
    fs::write(&manifest_path, json).map_err(|e| BackboneError::Io {
        path: manifest_path,
        source: e,
    })?;

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(weights_path.clone(), &recorder)
        .map_err(|e| BackboneError::Weights {
            path: weights_path,
            msg: e.to_string(),
        })
}
