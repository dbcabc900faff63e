//! Burn tensor backend for evaluating motion parameters inside a tensor graph.
//!
//! Every operation here is functional: the non-finite mask is applied with `mask_fill` on a new
//! tensor rather than by writing into the output, so the forward pass stays differentiable on
//! autodiff backends.
//!
//! # Example
//!
//! ```ignore
//! use burn::backend::NdArray;
//! use motion_curves::integration::burn_backend::TensorEvaluator;
//!
//! let evaluator = TensorEvaluator::<NdArray>::new(Default::default());
//! let boxes = evaluator.evaluate(batch_fit.parameters.view(), times.view())?;
//! ```

use burn::prelude::*;
use burn::tensor::{Shape, TensorData};
use ndarray::{Array3, ArrayView1, ArrayView3};

use crate::error::Error;

/// Log-space curve values `[N, Q, T, 4]` for parameters `[N, T, 4, 3]` and times `[N, Q]`.
pub fn log_signal<B: Backend>(
    parameters: Tensor<B, 4>,
    times: Tensor<B, 2>,
) -> Result<Tensor<B, 4>, Error> {
    let [batch, tracks, rows, cols] = parameters.dims();
    if rows != 4 || cols != 3 {
        return Err(Error::ParameterShape(vec![batch, tracks, rows, cols]));
    }
    let [time_batch, queries] = times.dims();
    if time_batch != batch {
        return Err(Error::BatchMismatch {
            parameters: batch,
            times: time_batch,
        });
    }

    let shape = Shape::new([batch, queries, tracks, 4]);
    let coefficient = |k: usize| {
        parameters
            .clone()
            .narrow(3, k, 1)
            .reshape([batch, 1, tracks, 4])
            .expand(shape.clone())
    };
    let t = times.reshape([batch, queries, 1, 1]).expand(shape.clone());

    Ok(coefficient(2) * t.clone() * t.clone() + coefficient(1) * t + coefficient(0))
}

/// LTRB boxes `[N, Q, T, 4]` for parameters `[N, T, 4, 3]` and times `[N, Q]`.
///
/// Boxes with any non-finite coordinate are zeroed as a whole.
pub fn evaluate_batch<B: Backend>(
    parameters: Tensor<B, 4>,
    times: Tensor<B, 2>,
) -> Result<Tensor<B, 4>, Error> {
    let signal = log_signal(parameters, times)?.exp();
    let center = signal.clone().narrow(3, 0, 2);
    let half = signal.narrow(3, 2, 2).div_scalar(2.0);
    let boxes = Tensor::cat(vec![center.clone() - half.clone(), center + half], 3);

    Ok(zero_non_finite(boxes))
}

/// LTRB boxes `[Q, T, 4]` for parameters `[T, 4, 3]` and times `[Q]`.
pub fn evaluate_unbatched<B: Backend>(
    parameters: Tensor<B, 3>,
    times: Tensor<B, 1>,
) -> Result<Tensor<B, 3>, Error> {
    let [queries] = times.dims();
    let boxes = evaluate_batch(parameters.unsqueeze_dim(0), times.reshape([1, queries]))?;
    Ok(boxes.squeeze(0))
}

/// Zero every box (last axis) that holds a NaN or infinity.
fn zero_non_finite<B: Backend, const D: usize>(boxes: Tensor<B, D>) -> Tensor<B, D> {
    let dims = Shape::new(boxes.dims());
    // `x - x` is NaN exactly where `x` is NaN or infinite.
    let invalid = (boxes.clone() - boxes.clone())
        .is_nan()
        .any_dim(D - 1)
        .expand(dims);
    boxes.mask_fill(invalid, 0.0)
}

/// Upload a `(T, 4, 3)` parameter array in the backend's float precision.
pub fn parameters_to_tensor<B: Backend>(
    parameters: ArrayView3<'_, f64>,
    device: &B::Device,
) -> Tensor<B, 3> {
    let (tracks, rows, cols) = parameters.dim();
    let data = TensorData::new(parameters.iter().copied().collect(), [tracks, rows, cols]);
    Tensor::from_data(data.convert::<B::FloatElem>(), device)
}

pub fn times_to_tensor<B: Backend>(times: ArrayView1<'_, f64>, device: &B::Device) -> Tensor<B, 1> {
    let data = TensorData::new(times.to_vec(), [times.len()]);
    Tensor::from_data(data.convert::<B::FloatElem>(), device)
}

/// Download a rank-3 tensor into an ndarray.
pub fn tensor_to_array<B: Backend>(tensor: Tensor<B, 3>) -> Result<Array3<f64>, Error> {
    let [a, b, c] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))?;
    Array3::from_shape_vec((a, b, c), values).map_err(|e| Error::TensorData(e.to_string()))
}

/// Evaluates ndarray parameter blocks on a Burn device.
pub struct TensorEvaluator<B: Backend> {
    device: B::Device,
}

impl<B: Backend> TensorEvaluator<B> {
    /// Create a new evaluator bound to `device`.
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Same contract as [`crate::motion::evaluate_batch`], computed with tensors.
    ///
    /// Arithmetic runs in `B::FloatElem`, so on f32 backends boxes overflow (and are zeroed)
    /// once a log value passes about 88.
    pub fn evaluate(
        &self,
        parameters: ArrayView3<'_, f64>,
        times: ArrayView1<'_, f64>,
    ) -> Result<Array3<f64>, Error> {
        let (tracks, rows, cols) = parameters.dim();
        if rows != 4 || cols != 3 {
            return Err(Error::ParameterShape(parameters.shape().to_vec()));
        }
        if tracks == 0 {
            return Err(Error::EmptyBatch);
        }
        if times.is_empty() {
            return Ok(Array3::zeros((0, tracks, 4)));
        }

        let boxes = evaluate_unbatched(
            parameters_to_tensor::<B>(parameters, &self.device),
            times_to_tensor::<B>(times, &self.device),
        )?;
        tensor_to_array(boxes)
    }
}
