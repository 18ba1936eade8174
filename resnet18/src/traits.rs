use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Whether normalization layers use (and update) batch statistics, or use
/// their stored running statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

pub trait Layer: Debug {
    /// For input of the given shape, compute the output shape.
    ///
    /// Axis 0 of both shapes is always the mini-batch axis.
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    /// Number of learnable scalars in this layer. Normalization running
    /// statistics are state, not parameters, and aren't counted.
    fn num_params(&self) -> usize {
        0
    }

    /// Compute the output of this layer for input `x`.
    ///
    /// Axis 0 of `x` is the mini-batch axis. This takes `&mut self` because
    /// in `Mode::Train` normalization layers update their running statistics;
    /// in `Mode::Eval` no layer changes.
    fn forward(&mut self, x: &Tensor, mode: Mode) -> Result<Tensor>;

    /// Call `f` on each parameter and state tensor, with its dotted name
    /// under `prefix`.
    fn visit_params<'a>(&'a self, _prefix: &str, _f: &mut dyn FnMut(String, &'a Tensor)) {}

    /// Find the parameter or state tensor called `name` (relative to this
    /// layer).
    fn param_mut(&mut self, _name: &str) -> Option<&mut Tensor> {
        None
    }

    /// All parameter and state tensors with their dotted names.
    fn named_params(&self) -> Vec<(String, &Tensor)> {
        let mut out = vec![];
        self.visit_params("", &mut |name, t| out.push((name, t)));
        out
    }

    /// Replace the tensor called `name`. The replacement must have the same
    /// shape as the current value.
    fn set_param(&mut self, name: &str, value: Tensor) -> Result<()> {
        let slot = self
            .param_mut(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        assign(slot, value, "set_param")
    }
}

/// A scalar function applied to every element.
pub trait ActivationFn: Copy + Clone + Debug {
    fn f(self, x: f32) -> f32;
}

/// Overwrite `slot` with `value` if the shapes agree.
pub(crate) fn assign(slot: &mut Tensor, value: Tensor, op: &'static str) -> Result<()> {
    if slot.shape() != value.shape() {
        return Err(Error::ShapeMismatch {
            op,
            expected: slot.shape().to_vec(),
            got: value.shape().to_vec(),
        });
    }
    *slot = value;
    Ok(())
}

/// Join a parameter name onto a dotted prefix.
pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
