use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::{Layer, Mode};

/// Reshape inputs to matrix form.
///
/// Axis 0, the mini-batch axis, is retained; every other axis is folded into
/// one row per example, so `(n, c, h, w)` becomes `(n, c * h * w)`.
#[derive(Debug, Clone, Default)]
pub struct Flatten;

impl Layer for Flatten {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match input_shape.split_first() {
            Some((&n, rest)) => Ok(vec![n, rest.iter().product()]),
            None => Err(Error::RankMismatch {
                op: "Flatten",
                expected: 1,
                got: 0,
            }),
        }
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        let shape = self.output_shape(x.shape())?;
        x.clone().into_shape(&shape)
    }
}
