#![recursion_limit = "256"]

pub mod config;
pub mod objective;
pub mod telemetry;
pub mod trainer;
pub mod util;

pub use config::RunConfig;
pub use objective::{optimize, pixel_logits, softmax_cross_entropy, Objective};
pub use trainer::{adam_session, train_nn, BatchLoss, Session, StepParams, TrainReport};
pub use util::{run_train, TrainArgs};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
