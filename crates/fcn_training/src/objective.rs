//! Per-pixel softmax cross-entropy over decoder output.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Logits flattened to one row per pixel, and the mean cross-entropy over them.
#[derive(Debug, Clone)]
pub struct Objective<B: Backend> {
    /// `[N * H * W, num_classes]`
    pub logits: Tensor<B, 2>,
    /// Mean cross-entropy, shape `[1]`.
    pub cross_entropy_loss: Tensor<B, 1>,
}

/// Reshape `[N, C, H, W]` to `[N * H * W, C]` with channels last.
pub fn pixel_logits<B: Backend>(
    nn_last_layer: Tensor<B, 4>,
    num_classes: usize,
) -> anyhow::Result<Tensor<B, 2>> {
    let [n, c, h, w] = nn_last_layer.dims();
    if c != num_classes {
        anyhow::bail!("decoder output has {c} channels, expected {num_classes} classes");
    }
    Ok(nn_last_layer
        .swap_dims(1, 2)
        .swap_dims(2, 3)
        .reshape([n * h * w, c]))
}

/// Mean over rows of `-sum(labels * log_softmax(logits))`.
pub fn softmax_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (labels * log_probs).sum_dim(1).neg().mean()
}

/// Build the objective for one batch.
///
/// `correct_label` is one-hot with the same `[N, C, H, W]` shape as the decoder output.
/// Nothing is computed on the parameters until the loss is back-propagated.
pub fn optimize<B: Backend>(
    nn_last_layer: Tensor<B, 4>,
    correct_label: Tensor<B, 4>,
    num_classes: usize,
) -> anyhow::Result<Objective<B>> {
    let out_dims = nn_last_layer.dims();
    let label_dims = correct_label.dims();
    if out_dims != label_dims {
        anyhow::bail!("label shape {label_dims:?} does not match decoder output {out_dims:?}");
    }
    let logits = pixel_logits(nn_last_layer, num_classes)?;
    let labels = pixel_logits(correct_label, num_classes)?;
    let cross_entropy_loss = softmax_cross_entropy(logits.clone(), labels);
    Ok(Objective {
        logits,
        cross_entropy_loss,
    })
}

/// Read a single-element tensor back to the host.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> anyhow::Result<f32> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read scalar: {e:?}"))?
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("scalar tensor is empty"))
}
