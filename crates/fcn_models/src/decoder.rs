//! FCN-8 decoder: 1x1 scoring, learned up-sampling and skip-connection fusion.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// How the three backbone maps are brought to input resolution and summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkipFusion {
    /// score7 x2 + score4, then x2 + score3, then x8.
    #[default]
    Cascade,
    /// Each map is up-sampled straight to input resolution (x32, x16, x8) and summed there.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub num_classes: usize,
    pub layer3_channels: usize,
    pub layer4_channels: usize,
    pub layer7_channels: usize,
    pub fusion: SkipFusion,
    /// Scale of the L2 penalty on decoder kernels.
    pub l2_scale: f64,
}

impl DecoderConfig {
    pub fn new(
        num_classes: usize,
        layer3_channels: usize,
        layer4_channels: usize,
        layer7_channels: usize,
    ) -> Self {
        Self {
            num_classes,
            layer3_channels,
            layer4_channels,
            layer7_channels,
            fusion: SkipFusion::default(),
            l2_scale: 1e-3,
        }
    }

    pub fn with_fusion(mut self, fusion: SkipFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_l2_scale(mut self, l2_scale: f64) -> Self {
        self.l2_scale = l2_scale;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Fcn8Decoder<B>, String> {
        if self.num_classes == 0 {
            return Err("num_classes must be at least 1".to_string());
        }
        if self.layer3_channels == 0 || self.layer4_channels == 0 || self.layer7_channels == 0 {
            return Err("feature map channel counts must be non-zero".to_string());
        }
        let c = self.num_classes;
        let (cascade, direct) = match self.fusion {
            SkipFusion::Cascade => (
                Some(CascadeHead {
                    score3: score(self.layer3_channels, c, device),
                    score4: score(self.layer4_channels, c, device),
                    score7: score(self.layer7_channels, c, device),
                    up7: upsample(c, c, 2, device),
                    up4: upsample(c, c, 2, device),
                    up_out: upsample(c, c, 8, device),
                }),
                None,
            ),
            SkipFusion::Direct => (
                None,
                Some(DirectHead {
                    score7: score(self.layer7_channels, c, device),
                    up7: upsample(c, c, 32, device),
                    up4: upsample(self.layer4_channels, c, 16, device),
                    up3: upsample(self.layer3_channels, c, 8, device),
                }),
            ),
        };
        Ok(Fcn8Decoder {
            cascade,
            direct,
            config: Ignored(self.clone()),
        })
    }
}

fn score<B: Backend>(in_ch: usize, classes: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, classes], [1, 1])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

/// Transposed convolution that multiplies spatial size by exactly `factor`.
///
/// x2 uses a 4x4 kernel (padding 1) and x8 a 16x16 kernel (padding 4), like FCN-8's
/// bilinear-sized filters; larger factors use a kernel equal to the stride.
fn upsample<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    factor: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    let (kernel, padding) = match factor {
        2 => (4, 1),
        8 => (16, 4),
        f => (f, 0),
    };
    ConvTranspose2dConfig::new([in_ch, out_ch], [kernel, kernel])
        .with_stride([factor, factor])
        .with_padding([padding, padding])
        .init(device)
}

#[derive(Module, Debug)]
pub struct CascadeHead<B: Backend> {
    score3: Conv2d<B>,
    score4: Conv2d<B>,
    score7: Conv2d<B>,
    up7: ConvTranspose2d<B>,
    up4: ConvTranspose2d<B>,
    up_out: ConvTranspose2d<B>,
}

impl<B: Backend> CascadeHead<B> {
    fn forward(
        &self,
        layer3_out: Tensor<B, 4>,
        layer4_out: Tensor<B, 4>,
        layer7_out: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.up7.forward(self.score7.forward(layer7_out));
        let x = x + self.score4.forward(layer4_out);
        let x = self.up4.forward(x);
        let x = x + self.score3.forward(layer3_out);
        self.up_out.forward(x)
    }

    fn kernels(&self) -> Vec<Tensor<B, 4>> {
        vec![
            self.score3.weight.val(),
            self.score4.weight.val(),
            self.score7.weight.val(),
            self.up7.weight.val(),
            self.up4.weight.val(),
            self.up_out.weight.val(),
        ]
    }
}

#[derive(Module, Debug)]
pub struct DirectHead<B: Backend> {
    score7: Conv2d<B>,
    up7: ConvTranspose2d<B>,
    up4: ConvTranspose2d<B>,
    up3: ConvTranspose2d<B>,
}

impl<B: Backend> DirectHead<B> {
    fn forward(
        &self,
        layer3_out: Tensor<B, 4>,
        layer4_out: Tensor<B, 4>,
        layer7_out: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let out7 = self.up7.forward(self.score7.forward(layer7_out));
        let out3 = self.up3.forward(layer3_out);
        let out4 = self.up4.forward(layer4_out);
        out7 + out3 + out4
    }

    fn kernels(&self) -> Vec<Tensor<B, 4>> {
        vec![
            self.score7.weight.val(),
            self.up7.weight.val(),
            self.up4.weight.val(),
            self.up3.weight.val(),
        ]
    }
}

/// Decoder producing `[N, num_classes, 8 * h3, 8 * w3]` class scores.
#[derive(Module, Debug)]
pub struct Fcn8Decoder<B: Backend> {
    cascade: Option<CascadeHead<B>>,
    direct: Option<DirectHead<B>>,
    pub config: Ignored<DecoderConfig>,
}

impl<B: Backend> Fcn8Decoder<B> {
    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    pub fn forward(
        &self,
        layer3_out: Tensor<B, 4>,
        layer4_out: Tensor<B, 4>,
        layer7_out: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match (&self.cascade, &self.direct) {
            (Some(head), _) => head.forward(layer3_out, layer4_out, layer7_out),
            (None, Some(head)) => head.forward(layer3_out, layer4_out, layer7_out),
            (None, None) => unreachable!("decoder is built with exactly one head"),
        }
    }

    /// `l2_scale * sum(w^2) / 2` over every decoder kernel.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let kernels = match (&self.cascade, &self.direct) {
            (Some(head), _) => head.kernels(),
            (None, Some(head)) => head.kernels(),
            (None, None) => Vec::new(),
        };
        let device = kernels
            .first()
            .map(|k| k.device())
            .unwrap_or_default();
        let sum = kernels
            .into_iter()
            .map(|k| k.powf_scalar(2.0).sum())
            .fold(Tensor::<B, 1>::zeros([1], &device), |acc, s| acc + s);
        sum * (self.config.l2_scale * 0.5)
    }
}
