//! Full `train` pipeline over a synthetic KITTI layout and a tiny backbone.

use burn_ndarray::NdArray;
use fcn_models::{save_vgg, SkipFusion, VggConfig};
use fcn_training::util::{load_fcn_from_checkpoint, run_train};
use fcn_training::TrainArgs;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

type B = NdArray<f32>;

/// `<root>/data_road` with `count` training pairs and one testing image.
fn write_kitti_layout(root: &Path, count: usize) -> anyhow::Result<()> {
    let road = root.join("data_road");
    let images = road.join("training/image_2");
    let gt = road.join("training/gt_image_2");
    let testing = road.join("testing/image_2");
    for dir in [&images, &gt, &testing] {
        fs::create_dir_all(dir)?;
    }
    for i in 0..count {
        let img = RgbImage::from_fn(120, 80, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 60]));
        img.save(images.join(format!("uu_{i:06}.png")))?;
        let mask = RgbImage::from_fn(120, 80, |_, y| {
            if y < 40 {
                Rgb([255, 0, 0])
            } else {
                Rgb([255, 0, 255])
            }
        });
        mask.save(gt.join(format!("uu_road_{i:06}.png")))?;
    }
    RgbImage::from_fn(120, 80, |_, _| Rgb([5, 5, 5])).save(testing.join("uu_000000.png"))?;
    Ok(())
}

fn write_tiny_backbone(dir: &Path) -> anyhow::Result<()> {
    let device = Default::default();
    let vgg = VggConfig::tiny().init::<B>(&device)?;
    save_vgg(&vgg, dir)?;
    Ok(())
}

fn write_config(dir: &Path, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("fcn-road.toml");
    fs::write(&path, body)?;
    Ok(path)
}

fn smoke_args(config: PathBuf) -> TrainArgs {
    TrainArgs {
        config: Some(config),
        epochs: Some(1),
        batch_size: Some(1),
        image_height: Some(64),
        image_width: Some(96),
        seed: Some(3),
        ..Default::default()
    }
}

#[test]
fn train_writes_a_loadable_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let runs = tmp.path().join("runs");
    write_kitti_layout(&data, 2)?;
    write_tiny_backbone(&data.join("vgg"))?;
    let config = write_config(
        tmp.path(),
        &format!(
            "data_dir = {:?}\nruns_dir = {:?}\n",
            data.display().to_string(),
            runs.display().to_string()
        ),
    )?;

    run_train(smoke_args(config))?;

    let ckpt = runs.join("fcn8_road.bin");
    assert!(ckpt.is_file(), "missing {}", ckpt.display());
    let device = Default::default();
    let model = load_fcn_from_checkpoint::<B, _>(
        &ckpt,
        &VggConfig::tiny(),
        2,
        SkipFusion::Cascade,
        &device,
    )?;
    assert_eq!(model.num_classes(), 2);
    Ok(())
}

#[test]
fn frozen_run_with_separate_backbone_dir() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let weights = tmp.path().join("weights").join("vgg16");
    let runs = tmp.path().join("out");
    write_kitti_layout(&data, 2)?;
    write_tiny_backbone(&weights)?;
    let config = write_config(
        tmp.path(),
        &format!(
            "data_dir = {:?}\nruns_dir = {:?}\ncheckpoint_name = \"frozen.bin\"\n\n[model]\nfusion = \"direct\"\n",
            data.display().to_string(),
            runs.display().to_string()
        ),
    )?;

    let args = TrainArgs {
        vgg_dir: Some(weights),
        freeze_backbone: true,
        ..smoke_args(config)
    };
    run_train(args)?;

    let ckpt = runs.join("frozen.bin");
    let device = Default::default();
    load_fcn_from_checkpoint::<B, _>(
        &ckpt,
        &VggConfig::tiny(),
        2,
        SkipFusion::Direct,
        &device,
    )?;
    Ok(())
}

#[test]
fn missing_backbone_or_strict_counts_abort_before_training() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let runs = tmp.path().join("runs");
    write_kitti_layout(&data, 2)?;
    let config = write_config(
        tmp.path(),
        &format!(
            "data_dir = {:?}\nruns_dir = {:?}\n",
            data.display().to_string(),
            runs.display().to_string()
        ),
    )?;

    assert!(run_train(smoke_args(config.clone())).is_err());

    write_tiny_backbone(&data.join("vgg"))?;
    let strict = TrainArgs {
        strict_layout: true,
        ..smoke_args(config)
    };
    assert!(run_train(strict).is_err());
    assert!(!runs.join("fcn8_road.bin").exists());
    Ok(())
}
