use ndarray::prelude::*;

use crate::error::Result;
use crate::tensor::Tensor;
use crate::{Layer, Mode};

/// Convert each row of a `(batch, classes)` tensor to a probability
/// distribution, using the [softmax function](https://en.wikipedia.org/wiki/Softmax_function).
///
/// The row maximum is subtracted before exponentiating, so large logits
/// don't overflow.
pub fn softmax(x: &Tensor) -> Result<Tensor> {
    let mut y = x.view2("softmax")?.to_owned();
    for mut row in y.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    Ok(Tensor::from(y))
}

/// Index of the largest value in `row`; ties go to the lower index. An empty
/// row gives 0.
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Layer form of [`softmax`]. This is often the last layer in a
/// classification network.
#[derive(Debug)]
pub struct Softmax;

impl Layer for Softmax {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        softmax(x)
    }
}
