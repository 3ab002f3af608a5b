use crate::decoder::{DecoderConfig, Fcn8Decoder, SkipFusion};
use crate::vgg::{BackboneTaps, Vgg16};
use burn::module::Module;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Backbone plus decoder; the unit that is trained and checkpointed.
#[derive(Module, Debug)]
pub struct Fcn8<B: Backend> {
    pub backbone: Vgg16<B>,
    pub decoder: Fcn8Decoder<B>,
}

impl<B: Backend> Fcn8<B> {
    /// Attach a freshly initialised decoder to `backbone`.
    pub fn from_backbone(
        backbone: Vgg16<B>,
        num_classes: usize,
        fusion: SkipFusion,
        l2_scale: f64,
        device: &B::Device,
    ) -> Result<Self, String> {
        let cfg = &backbone.config;
        let decoder = DecoderConfig::new(
            num_classes,
            cfg.layer3_channels(),
            cfg.layer4_channels(),
            cfg.layer7_channels(),
        )
        .with_fusion(fusion)
        .with_l2_scale(l2_scale)
        .init(device)?;
        Ok(Self { backbone, decoder })
    }

    pub fn num_classes(&self) -> usize {
        self.decoder.num_classes()
    }

    /// Stop gradients through the backbone so only the decoder trains.
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    /// Backbone taps plus the decoder output `[N, C, H, W]`.
    pub fn forward_with_taps(
        &self,
        image_input: Tensor<B, 4>,
        keep_prob: f64,
    ) -> (BackboneTaps<B>, Tensor<B, 4>) {
        let taps = self.backbone.forward(image_input, keep_prob);
        let out = self.decoder.forward(
            taps.layer3_out.clone(),
            taps.layer4_out.clone(),
            taps.layer7_out.clone(),
        );
        (taps, out)
    }

    pub fn forward(&self, image_input: Tensor<B, 4>, keep_prob: f64) -> Tensor<B, 4> {
        self.forward_with_taps(image_input, keep_prob).1
    }

    /// Per-pixel class probabilities `[N, C, H, W]`.
    pub fn predict(&self, image_input: Tensor<B, 4>) -> Tensor<B, 4> {
        softmax(self.forward(image_input, 1.0), 1)
    }
}
