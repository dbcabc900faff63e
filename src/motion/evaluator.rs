//! Reconstruct boxes from fitted parameters.

use ndarray::{Array3, ArrayView1, ArrayView3, Axis, Zip};

use crate::error::Error;
use crate::motion::bbox::BBox;
use crate::motion::params::MotionParameters;

/// Box of one track at one time. Non-finite values propagate.
#[inline]
pub fn evaluate(parameters: &MotionParameters, time: f64) -> BBox {
    parameters.bbox_at(time)
}

/// Boxes for every `(time, track)` pair.
///
/// `parameters` has shape `(T, 4, 3)` and `times` shape `(Q,)`; the result has shape
/// `(Q, T, 4)` in LTRB order. A box with any non-finite coordinate is zeroed as a whole.
/// Query rows are filled in parallel.
pub fn evaluate_batch(
    parameters: ArrayView3<'_, f64>,
    times: ArrayView1<'_, f64>,
) -> Result<Array3<f64>, Error> {
    let blocks = split_blocks(parameters)?;

    let mut boxes = Array3::zeros((times.len(), blocks.len(), 4));
    Zip::from(boxes.axis_iter_mut(Axis(0)))
        .and(&times)
        .par_for_each(|mut row, &time| {
            for (mut out, params) in row.outer_iter_mut().zip(&blocks) {
                let ltrb = evaluate(params, time).or_zero().to_ltrb();
                out.iter_mut().zip(ltrb).for_each(|(o, v)| *o = v);
            }
        });

    Ok(boxes)
}

/// Split a `(T, 4, 3)` array into per-track blocks.
pub(crate) fn split_blocks(
    parameters: ArrayView3<'_, f64>,
) -> Result<Vec<MotionParameters>, Error> {
    let (tracks, rows, cols) = parameters.dim();
    if rows != 4 || cols != 3 {
        return Err(Error::ParameterShape(parameters.shape().to_vec()));
    }
    if tracks == 0 {
        return Err(Error::EmptyBatch);
    }
    parameters
        .outer_iter()
        .map(MotionParameters::from_view)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, stack};

    fn block(cx: f64, cy: f64, w: f64, h: f64, p2: f64) -> MotionParameters {
        MotionParameters::new([
            [cx.ln(), 0.1, p2],
            [cy.ln(), -0.05, 0.0],
            [w.ln(), 0.0, 0.0],
            [h.ln(), 0.02, 0.01],
        ])
    }

    fn stack_blocks(blocks: &[MotionParameters]) -> Array3<f64> {
        let arrays: Vec<_> = blocks.iter().map(|b| b.to_array()).collect();
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        stack(Axis(0), &views).unwrap()
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let blocks = [block(0.5, 0.4, 0.1, 0.2, 0.0), block(0.3, 0.6, 0.2, 0.1, 0.5)];
        let params = stack_blocks(&blocks);
        let times = Array1::from_vec(vec![0.0, 0.25, 1.0, 3.0]);

        let boxes = evaluate_batch(params.view(), times.view()).unwrap();
        assert_eq!(boxes.dim(), (4, 2, 4));

        for (q, &t) in times.iter().enumerate() {
            for (k, b) in blocks.iter().enumerate() {
                let expected = evaluate(b, t).to_ltrb();
                for c in 0..4 {
                    assert_relative_eq!(boxes[[q, k, c]], expected[c], max_relative = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_exploding_pair_is_zeroed_whole() {
        let blocks = [block(0.5, 0.4, 0.1, 0.2, 0.0), block(0.3, 0.6, 0.2, 0.1, 1e308)];
        let params = stack_blocks(&blocks);
        let times = Array1::from_vec(vec![0.0, 10.0]);

        let boxes = evaluate_batch(params.view(), times.view()).unwrap();

        // At t = 0 the huge p2 is multiplied away and the box is valid.
        assert!(boxes.slice(ndarray::s![0, 1, ..]).iter().all(|&v| v > 0.0));
        // At t = 10 it overflows, and only that pair is cleared.
        assert!(boxes.slice(ndarray::s![1, 1, ..]).iter().all(|&v| v == 0.0));
        let healthy = evaluate(&blocks[0], 10.0).to_ltrb();
        for c in 0..4 {
            assert_eq!(boxes[[1, 0, c]], healthy[c]);
        }
    }

    #[test]
    fn test_nan_parameters_zero_the_box() {
        let mut rows = *block(0.5, 0.4, 0.1, 0.2, 0.0).rows();
        rows[3][1] = f64::NAN;
        let params = stack_blocks(&[MotionParameters::new(rows)]);
        let boxes = evaluate_batch(params.view(), Array1::from_vec(vec![1.0]).view()).unwrap();
        assert!(boxes.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_shape_validation() {
        let wrong = Array3::<f64>::zeros((2, 4, 2));
        let times = Array1::from_vec(vec![0.0]);
        assert_eq!(
            evaluate_batch(wrong.view(), times.view()),
            Err(Error::ParameterShape(vec![2, 4, 2]))
        );

        let empty = Array3::<f64>::zeros((0, 4, 3));
        assert_eq!(
            evaluate_batch(empty.view(), times.view()),
            Err(Error::EmptyBatch)
        );
    }

    #[test]
    fn test_no_queries() {
        let params = stack_blocks(&[block(0.5, 0.4, 0.1, 0.2, 0.0)]);
        let boxes = evaluate_batch(params.view(), Array1::<f64>::zeros(0).view()).unwrap();
        assert_eq!(boxes.dim(), (0, 1, 4));
    }
}
