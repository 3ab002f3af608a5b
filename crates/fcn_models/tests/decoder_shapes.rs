use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use fcn_models::{DecoderConfig, Fcn8, SkipFusion, VggConfig};

type B = NdArray<f32>;

#[test]
fn decoder_output_matches_input_resolution_for_any_class_count() {
    let device = Default::default();
    for fusion in [SkipFusion::Cascade, SkipFusion::Direct] {
        for classes in [1, 2, 5] {
            let decoder = DecoderConfig::new(classes, 8, 16, 32)
                .with_fusion(fusion)
                .init::<B>(&device)
                .expect("valid decoder config");
            let layer3 = Tensor::<B, 4>::ones([2, 8, 8, 12], &device);
            let layer4 = Tensor::<B, 4>::ones([2, 16, 4, 6], &device);
            let layer7 = Tensor::<B, 4>::ones([2, 32, 2, 3], &device);

            let out = decoder.forward(layer3, layer4, layer7);
            // 8x the shallowest tap, i.e. the 64x96 image the taps came from.
            assert_eq!(out.dims(), [2, classes, 64, 96], "{fusion:?} / {classes}");
        }
    }
}

#[test]
fn single_cell_deep_map_still_fuses() {
    let device = Default::default();
    let layer3 = Tensor::<B, 4>::ones([2, 8, 4, 4], &device);
    let layer4 = Tensor::<B, 4>::ones([2, 16, 2, 2], &device);
    let layer7 = Tensor::<B, 4>::ones([2, 32, 1, 1], &device);
    let decoder = DecoderConfig::new(2, 8, 16, 32)
        .init::<B>(&device)
        .expect("valid decoder config");
    let out = decoder.forward(layer3, layer4, layer7);
    assert_eq!(out.dims(), [2, 2, 32, 32]);
}

#[test]
fn zero_classes_are_rejected() {
    let device = Default::default();
    assert!(DecoderConfig::new(0, 8, 16, 32).init::<B>(&device).is_err());
}

#[test]
fn l2_penalty_follows_scale() {
    let device = Default::default();
    let scaled = DecoderConfig::new(2, 8, 16, 32)
        .with_l2_scale(1e-3)
        .init::<B>(&device)
        .expect("valid decoder config");
    let penalty: f32 = scaled.l2_penalty().into_data().to_vec::<f32>().unwrap()[0];
    assert!(penalty > 0.0);

    let unscaled = DecoderConfig::new(2, 8, 16, 32)
        .with_l2_scale(0.0)
        .init::<B>(&device)
        .expect("valid decoder config");
    let penalty: f32 = unscaled.l2_penalty().into_data().to_vec::<f32>().unwrap()[0];
    assert_eq!(penalty, 0.0);
}

#[test]
fn full_network_segments_at_image_resolution() -> anyhow::Result<()> {
    let device = Default::default();
    let backbone = VggConfig::tiny().init::<B>(&device)?;
    let model = Fcn8::from_backbone(backbone, 2, SkipFusion::Cascade, 1e-3, &device)
        .map_err(anyhow::Error::msg)?;

    let images = Tensor::<B, 4>::zeros([1, 3, 64, 96], &device);
    let (taps, out) = model.forward_with_taps(images.clone(), 1.0);
    assert_eq!(taps.handles().len(), 5);
    assert_eq!(out.dims(), [1, 2, 64, 96]);

    let probs = model.predict(images);
    let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
    assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    Ok(())
}
