use clap::Parser;
use fcn_models::SkipFusion;
use fcn_training::{RunConfig, TrainArgs};
use road_dataset::ImageShape;
use std::path::PathBuf;

#[test]
fn defaults_describe_a_full_kitti_run() {
    let cfg = RunConfig::default();
    assert_eq!(cfg.num_classes, 2);
    assert_eq!(cfg.epochs, 50);
    assert_eq!(cfg.batch_size, 100);
    assert_eq!(cfg.image_shape, ImageShape::new(160, 576));
    assert_eq!(cfg.data_dir, PathBuf::from("./data"));
    assert_eq!(cfg.runs_dir, PathBuf::from("./runs"));
    assert_eq!(cfg.vgg_dir(), PathBuf::from("./data").join("vgg"));
    assert_eq!(cfg.dataset_root(), PathBuf::from("./data").join("data_road"));
    assert_eq!(cfg.keep_prob, 1.0);
    assert_eq!(cfg.learning_rate, 1e-3);
    assert_eq!(cfg.fusion, SkipFusion::Cascade);
    assert!(!cfg.add_l2_to_loss);
    assert!(!cfg.strict_layout);
    cfg.validate().unwrap();
}

#[test]
fn empty_file_yields_defaults() {
    assert_eq!(RunConfig::from_toml("").unwrap(), RunConfig::default());
}

#[test]
fn toml_sections_override_defaults() {
    let raw = r#"
epochs = 3
batch_size = 4
image_height = 64
image_width = 96
data_dir = "/mnt/kitti"
vgg_dir = "/mnt/weights/vgg"
seed = 7
checkpoint_name = "smoke.bin"
strict_layout = true

[step]
keep_prob = 0.5
learning_rate = 1e-4

[model]
l2_scale = 0.0
add_l2_to_loss = true
fusion = "direct"
freeze_backbone = true
"#;
    let cfg = RunConfig::from_toml(raw).unwrap();
    assert_eq!(cfg.epochs, 3);
    assert_eq!(cfg.batch_size, 4);
    assert_eq!(cfg.image_shape, ImageShape::new(64, 96));
    assert_eq!(cfg.dataset_root(), PathBuf::from("/mnt/kitti/data_road"));
    assert_eq!(cfg.vgg_dir(), PathBuf::from("/mnt/weights/vgg"));
    assert_eq!(cfg.seed, Some(7));
    assert_eq!(cfg.checkpoint_path(), PathBuf::from("./runs/smoke.bin"));
    assert_eq!(cfg.keep_prob, 0.5);
    assert_eq!(cfg.learning_rate, 1e-4);
    assert_eq!(cfg.l2_scale, 0.0);
    assert!(cfg.add_l2_to_loss);
    assert!(cfg.strict_layout);
    assert_eq!(cfg.fusion, SkipFusion::Direct);
    assert!(cfg.freeze_backbone);
    cfg.validate().unwrap();
}

#[test]
fn unknown_keys_and_fusions_are_rejected() {
    assert!(RunConfig::from_toml("epoch = 3").is_err());
    assert!(RunConfig::from_toml("[model]\nfusion = \"skip-all\"").is_err());
}

#[test]
fn out_of_range_values_fail_validation() {
    let cases: Vec<fn(&mut RunConfig)> = vec![
        |c| c.num_classes = 0,
        |c| c.epochs = 0,
        |c| c.batch_size = 0,
        |c| c.image_shape = ImageShape::new(100, 576),
        |c| c.keep_prob = 0.0,
        |c| c.keep_prob = 1.5,
        |c| c.learning_rate = -1.0,
        |c| c.l2_scale = f64::NAN,
    ];
    for mutate in cases {
        let mut cfg = RunConfig::default();
        mutate(&mut cfg);
        assert!(cfg.validate().is_err(), "accepted {cfg:?}");
    }
}

#[test]
fn explicit_config_path_is_read() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("run.toml");
    std::fs::write(&path, "epochs = 9\n")?;
    let cfg = RunConfig::load(Some(&path))?;
    assert_eq!(cfg.epochs, 9);

    assert!(RunConfig::load(Some(&tmp.path().join("absent.toml"))).is_err());
    Ok(())
}

#[test]
fn cli_flags_override_file_values() {
    let args = TrainArgs::parse_from([
        "train",
        "--epochs",
        "2",
        "--lr",
        "0.01",
        "--fusion",
        "direct",
        "--freeze-backbone",
        "--add-l2-to-loss",
        "--vgg-dir",
        "/tmp/vgg",
    ]);
    let mut cfg = RunConfig::from_toml("epochs = 9\nbatch_size = 8").unwrap();
    args.apply(&mut cfg).unwrap();

    assert_eq!(cfg.epochs, 2);
    assert_eq!(cfg.batch_size, 8);
    assert_eq!(cfg.learning_rate, 0.01);
    assert_eq!(cfg.fusion, SkipFusion::Direct);
    assert!(cfg.freeze_backbone);
    assert!(cfg.add_l2_to_loss);
    assert!(!cfg.strict_layout);
    assert_eq!(cfg.vgg_dir(), PathBuf::from("/tmp/vgg"));

    let bad = TrainArgs {
        fusion: Some("sideways".to_string()),
        ..Default::default()
    };
    assert!(bad.apply(&mut cfg).is_err());
}
