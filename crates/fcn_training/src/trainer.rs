//! Training session and the epoch/batch loop.

use crate::objective::{optimize, scalar};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use fcn_models::Fcn8;
use road_dataset::{BatchSource, SampleBatch};

/// Values fed to every step: dropout keep probability and learning rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub keep_prob: f64,
    pub learning_rate: f64,
    /// Minimize cross-entropy plus the decoder's L2 penalty instead of cross-entropy alone.
    pub add_l2_to_loss: bool,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            keep_prob: 1.0,
            learning_rate: 1e-3,
            add_l2_to_loss: false,
        }
    }
}

/// Model, optimizer state and step counter.
///
/// Creating a session is the one-time initialization: the decoder carries fresh weights,
/// the optimizer has no moments yet, and nothing in the loop resets either.
pub struct Session<B: AutodiffBackend, O: Optimizer<Fcn8<B>, B>> {
    model: Fcn8<B>,
    optim: O,
    device: B::Device,
    steps: usize,
}

/// Session minimizing with Adam (default betas and epsilon).
pub fn adam_session<B: AutodiffBackend>(
    model: Fcn8<B>,
    device: B::Device,
) -> Session<B, impl Optimizer<Fcn8<B>, B>>
where
    Fcn8<B>: AutodiffModule<B>,
{
    Session::new(model, AdamConfig::new().init::<B, Fcn8<B>>(), device)
}

impl<B: AutodiffBackend, O: Optimizer<Fcn8<B>, B>> Session<B, O> {
    pub fn new(model: Fcn8<B>, optim: O, device: B::Device) -> Self {
        Self {
            model,
            optim,
            device,
            steps: 0,
        }
    }

    pub fn model(&self) -> &Fcn8<B> {
        &self.model
    }

    pub fn into_model(self) -> Fcn8<B> {
        self.model
    }

    /// Training steps executed so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// One optimizer step on `batch`; returns the cross-entropy before the update.
    ///
    /// The decoder's L2 penalty only joins the minimized loss when `add_l2_to_loss` is set.
    pub fn step(&mut self, batch: &SampleBatch, params: StepParams) -> anyhow::Result<f32> {
        let num_classes = self.model.num_classes();
        if batch.num_classes != num_classes {
            anyhow::bail!(
                "batch labels have {} classes, model predicts {num_classes}",
                batch.num_classes
            );
        }
        let (images, labels) = batch.to_tensors::<B>(&self.device);
        let output = self.model.forward(images, params.keep_prob);
        let objective = optimize(output, labels, num_classes)?;

        let loss = objective.cross_entropy_loss.clone().detach();
        let total = if params.add_l2_to_loss {
            objective.cross_entropy_loss + self.model.decoder.l2_penalty()
        } else {
            objective.cross_entropy_loss
        };
        let grads = GradientsParams::from_grads(total.backward(), &self.model);
        self.model = self
            .optim
            .step(params.learning_rate, self.model.clone(), grads);
        self.steps += 1;

        scalar(loss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLoss {
    pub epoch: usize,
    /// 1-based index within the epoch.
    pub batch: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub steps: usize,
    pub losses: Vec<BatchLoss>,
}

impl TrainReport {
    pub fn epoch_mean(&self, epoch: usize) -> Option<f32> {
        let losses: Vec<f32> = self
            .losses
            .iter()
            .filter(|l| l.epoch == epoch)
            .map(|l| l.loss)
            .collect();
        if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f32>() / losses.len() as f32)
        }
    }
}

/// Run `epochs` full passes over `get_batches`, one step per batch.
///
/// Any error aborts the run; there is no checkpointing or early stopping inside the loop.
pub fn train_nn<B, O, S>(
    session: &mut Session<B, O>,
    epochs: usize,
    batch_size: usize,
    get_batches: &mut S,
    params: StepParams,
) -> anyhow::Result<TrainReport>
where
    B: AutodiffBackend,
    O: Optimizer<Fcn8<B>, B>,
    S: BatchSource + ?Sized,
{
    let mut report = TrainReport::default();
    for epoch in 0..epochs {
        get_batches.reset(batch_size)?;
        let mut batch_num = 0usize;
        while let Some(batch) = get_batches.next_batch()? {
            let loss = session.step(&batch, params)?;
            batch_num += 1;
            tracing::info!(epoch, batch = batch_num, loss, "train step");
            report.losses.push(BatchLoss {
                epoch,
                batch: batch_num,
                loss,
            });
            report.steps += 1;
        }
        match report.epoch_mean(epoch) {
            Some(avg) => tracing::info!(epoch, batches = batch_num, avg_loss = avg, "epoch done"),
            None => tracing::warn!(epoch, "batch generator produced no batches"),
        }
    }
    Ok(report)
}
