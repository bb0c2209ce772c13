//! Class-weighted binary cross-entropy on logits.

use candle_core::{Result, Tensor};

/// `#neg / max(#pos, 1)` over the given labels.
pub fn positive_weight(labels: &[u8]) -> f64 {
    let pos = labels.iter().filter(|&&y| y == 1).count();
    let neg = labels.len() - pos;
    neg as f64 / pos.max(1) as f64
}

/// Numerically stable `log(1 + exp(x))`.
fn softplus(xs: &Tensor) -> Result<Tensor> {
    let tail = xs.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    xs.relu()?.add(&tail)
}

/// Mean of `pw * y * softplus(-x) + (1 - y) * softplus(x)`.
pub fn weighted_bce_with_logits(logits: &Tensor, targets: &Tensor, pos_weight: f64) -> Result<Tensor> {
    let positive = softplus(&logits.neg()?)?
        .mul(targets)?
        .affine(pos_weight, 0.)?;
    let negative = softplus(logits)?.mul(&targets.affine(-1.0, 1.0)?)?;
    positive.add(&negative)?.mean_all()
}
