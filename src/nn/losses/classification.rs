//! Auxiliary classifier loss with label smoothing

use candle_core::{Module, Tensor};

use super::clipped_log;
use crate::error::PidsimResult;
use crate::gan::samples::Sample;
use crate::nn::models::Sequential;

/// Soft target assigned to generated rows
pub const GENERATED_SOFT_LABEL: f64 = 0.1;

/// Soft target assigned to reference rows
pub const REFERENCE_SOFT_LABEL: f64 = 0.9;

/// Weighted log-likelihood of probabilities `p` against soft target `k`:
/// `w (k log p + (1 - k) log(1 - p))`, one value per row
pub fn soft_label_log_likelihood(
    probabilities: &Tensor,
    weights: &Tensor,
    target: f64,
) -> PidsimResult<Tensor> {
    let positive = clipped_log(probabilities)?.affine(target, 0.0)?;
    let negative = clipped_log(&probabilities.affine(-1.0, 1.0)?)?.affine(1.0 - target, 0.0)?;
    Ok(positive.add(&negative)?.mul(weights)?)
}

/// Binary cross-entropy of the classifier telling generated from reference rows
pub fn classifier_loss(
    classifier: &Sequential,
    generated: &Sample,
    reference: &Sample,
) -> PidsimResult<Tensor> {
    let p_gen = classifier.forward(&generated.features)?;
    let p_ref = classifier.forward(&reference.features)?;
    let gen_term = soft_label_log_likelihood(&p_gen, &generated.weights, GENERATED_SOFT_LABEL)?;
    let ref_term = soft_label_log_likelihood(&p_ref, &reference.weights, REFERENCE_SOFT_LABEL)?;
    Ok(gen_term.add(&ref_term)?.mean_all()?.neg()?)
}
