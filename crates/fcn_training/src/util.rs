use burn::backend::Autodiff;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use fcn_models::{load_vgg, Fcn8, SkipFusion, VggConfig};
use road_dataset::{validate_layout_with, BatchConfig, KittiBatches};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{parse_fusion, RunConfig};
use crate::trainer::{adam_session, train_nn, StepParams};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Train an FCN-8 road segmenter on KITTI road using a pretrained VGG16 backbone"
)]
pub struct TrainArgs {
    /// TOML config file (defaults to $FCN_ROAD_CONFIG, then ./fcn-road.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray, or wgpu if built with backend-wgpu).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// Number of classes.
    #[arg(long)]
    pub num_classes: Option<usize>,
    /// Number of epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Training image height (multiple of 32).
    #[arg(long)]
    pub image_height: Option<u32>,
    /// Training image width (multiple of 32).
    #[arg(long)]
    pub image_width: Option<u32>,
    /// Root holding `vgg/` and `data_road/`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output directory for the trained checkpoint.
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,
    /// Pretrained backbone directory (defaults to <data_dir>/vgg).
    #[arg(long)]
    pub vgg_dir: Option<PathBuf>,
    /// Dropout keep probability fed to every step.
    #[arg(long)]
    pub keep_prob: Option<f64>,
    /// Learning rate fed to every step.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Skip fusion topology: cascade or direct.
    #[arg(long)]
    pub fusion: Option<String>,
    /// Train the decoder only.
    #[arg(long, default_value_t = false)]
    pub freeze_backbone: bool,
    /// Minimize cross-entropy plus the decoder L2 penalty.
    #[arg(long, default_value_t = false)]
    pub add_l2_to_loss: bool,
    /// Fail unless the dataset has the official KITTI road file counts.
    #[arg(long, default_value_t = false)]
    pub strict_layout: bool,
    /// Seed for reproducible shuffling.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    /// Layer CLI flags over a loaded config.
    pub fn apply(&self, cfg: &mut RunConfig) -> anyhow::Result<()> {
        if let Some(v) = self.num_classes {
            cfg.num_classes = v;
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.image_height {
            cfg.image_shape.height = v;
        }
        if let Some(v) = self.image_width {
            cfg.image_shape.width = v;
        }
        if let Some(v) = &self.data_dir {
            cfg.data_dir = v.clone();
        }
        if let Some(v) = &self.runs_dir {
            cfg.runs_dir = v.clone();
        }
        if let Some(v) = &self.vgg_dir {
            cfg.vgg_dir = Some(v.clone());
        }
        if let Some(v) = self.keep_prob {
            cfg.keep_prob = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = &self.fusion {
            cfg.fusion = parse_fusion(v)?;
        }
        if self.freeze_backbone {
            cfg.freeze_backbone = true;
        }
        if self.add_l2_to_loss {
            cfg.add_l2_to_loss = true;
        }
        if self.strict_layout {
            cfg.strict_layout = true;
        }
        if let Some(v) = self.seed {
            cfg.seed = Some(v);
        }
        Ok(())
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let mut cfg = RunConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg)?;
    cfg.validate()?;
    validate_backend_choice(args.backend.unwrap_or(BackendKind::NdArray))?;
    warn_if_no_accelerator();

    let data_road = cfg.dataset_root();
    let layout = validate_layout_with(&data_road, cfg.strict_layout)
        .map_err(|e| anyhow::anyhow!("dataset check failed for {}: {e}", data_road.display()))?;
    tracing::info!(
        training = layout.training_images,
        testing = layout.testing_images,
        "dataset layout ok"
    );

    let device = <ADBackend as Backend>::Device::default();
    let vgg_dir = cfg.vgg_dir();
    let backbone = load_vgg::<ADBackend>(&vgg_dir, &device)?;
    let mut model = Fcn8::from_backbone(
        backbone,
        cfg.num_classes,
        cfg.fusion,
        cfg.l2_scale,
        &device,
    )
    .map_err(|e| anyhow::anyhow!("failed to build decoder: {e}"))?;
    if cfg.freeze_backbone {
        model = model.freeze_backbone();
    }

    let mut batches = KittiBatches::from_root(
        &data_road,
        BatchConfig {
            shape: cfg.image_shape,
            shuffle: true,
            seed: cfg.seed,
            ..Default::default()
        },
    )?;
    tracing::info!(
        samples = batches.len(),
        batches_per_epoch = batches.batches_per_pass(cfg.batch_size),
        epochs = cfg.epochs,
        "starting training"
    );

    let params = StepParams {
        keep_prob: cfg.keep_prob,
        learning_rate: cfg.learning_rate,
        add_l2_to_loss: cfg.add_l2_to_loss,
    };
    let mut session = adam_session(model, device);
    let report = train_nn(&mut session, cfg.epochs, cfg.batch_size, &mut batches, params)?;
    tracing::info!(steps = report.steps, "training finished");

    let ckpt_path = cfg.checkpoint_path();
    save_fcn_checkpoint(session.model(), &ckpt_path)?;
    tracing::info!(path = %ckpt_path.display(), "saved checkpoint");
    Ok(())
}

pub fn save_fcn_checkpoint<B: Backend>(model: &Fcn8<B>, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))
}

/// Rebuild the network shape and load trained weights into it.
pub fn load_fcn_from_checkpoint<B: Backend, P: AsRef<Path>>(
    path: P,
    backbone: &VggConfig,
    num_classes: usize,
    fusion: SkipFusion,
    device: &B::Device,
) -> anyhow::Result<Fcn8<B>> {
    let vgg = backbone.init::<B>(device)?;
    let model = Fcn8::from_backbone(vgg, num_classes, fusion, 0.0, device)
        .map_err(|e| anyhow::anyhow!("failed to build decoder: {e}"))?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path.as_ref(), &recorder, device)
        .map_err(|e: RecorderError| anyhow::anyhow!("failed to load checkpoint: {e}"))
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::info!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Training proceeds on whatever backend is compiled in; a CPU-only build only warns.
pub fn warn_if_no_accelerator() {
    if cfg!(feature = "backend-wgpu") {
        tracing::info!("using WGPU backend");
    } else {
        tracing::warn!("No GPU backend found. Training on the CPU (NdArray) will be slow.");
    }
}
