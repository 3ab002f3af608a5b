//! Write a randomly initialised backbone in the saved-model layout `train` loads.
//!
//! Useful for smoke runs when no pretrained weights are at hand.

use burn::tensor::backend::Backend;
use clap::Parser;
use fcn_models::{save_vgg, VggConfig};
use fcn_training::telemetry::init_tracing;
use fcn_training::TrainBackend;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "init_backbone", about = "Write an untrained VGG16 backbone directory")]
struct Args {
    /// Output directory.
    #[arg(long, default_value = "data/vgg")]
    out: PathBuf,
    /// Use the narrow test-sized backbone instead of full VGG16.
    #[arg(long, default_value_t = false)]
    tiny: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = Args::parse();
    let cfg = if args.tiny {
        VggConfig::tiny()
    } else {
        VggConfig::default()
    };
    let device = <TrainBackend as Backend>::Device::default();
    let model = cfg.init::<TrainBackend>(&device)?;
    save_vgg(&model, &args.out)?;
    tracing::info!(path = %args.out.display(), tiny = args.tiny, "wrote backbone");
    Ok(())
}
