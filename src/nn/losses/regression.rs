//! Regression losses

use candle_core::Tensor;

use super::{apply_reduction, Reduction};
use crate::error::{PidsimError, PidsimResult};

/// Squared error averaged over the columns of each row, reduced as asked
pub fn mean_squared_error(
    predictions: &Tensor,
    targets: &Tensor,
    reduction: Reduction,
) -> PidsimResult<Tensor> {
    if predictions.dims() != targets.dims() {
        return Err(PidsimError::shape_error(
            &format!("{:?}", targets.dims()),
            &format!("{:?}", predictions.dims()),
            Some("predictions and targets must have the same shape"),
        ));
    }
    let per_row = predictions.sub(targets)?.sqr()?.mean_keepdim(1)?;
    apply_reduction(per_row, reduction)
}
