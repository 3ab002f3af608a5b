//! Burn modules for FCN-8 road segmentation.
//!
//! - `Vgg16`: VGG16 feature extractor exposing pool3, pool4 and fc7 taps, plus the
//!   saved-model format read by `load_vgg`.
//! - `Fcn8Decoder`: 1x1 scoring and transposed-convolution up-sampling with skip fusion.
//! - `Fcn8`: backbone and decoder as one trainable module.

pub mod decoder;
pub mod fcn;
pub mod vgg;

pub use decoder::{DecoderConfig, Fcn8Decoder, SkipFusion};
pub use fcn::Fcn8;
pub use vgg::{
    load_vgg, save_vgg, BackboneError, BackboneTaps, SavedModelManifest, Vgg16, VggConfig,
    TAP_NAMES, VGG_TAG,
};

pub mod prelude {
    pub use super::{
        load_vgg, DecoderConfig, Fcn8, Fcn8Decoder, SkipFusion, Vgg16, VggConfig,
    };
}
