use crate::error::Result;
use crate::tensor::Tensor;
use crate::{ActivationFn, Layer, Mode};

/// Layer that applies the same real-valued function to each element.
#[derive(Debug, Clone, Copy)]
pub struct Activation<F> {
    f: F,
}

impl<F> Activation<F>
where
    F: ActivationFn,
{
    pub fn new(f: F) -> Self {
        Activation { f }
    }

    /// Apply the function to every element of `x`, in place.
    pub fn apply_inplace(&self, x: &mut Tensor) {
        let f = self.f;
        x.map_inplace(move |v| f.f(v));
    }
}

impl<F> Layer for Activation<F>
where
    F: ActivationFn,
{
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        let f = self.f;
        Ok(x.map(move |v| f.f(v)))
    }
}

/// The logistic function, `1 / (1 + e^-x)`.
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

impl ActivationFn for Sigmoid {
    fn f(self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }
}

/// Rectified linear unit activation function.
#[derive(Debug, Clone, Copy)]
pub struct Relu;

impl ActivationFn for Relu {
    fn f(self, x: f32) -> f32 {
        if x >= 0.0 {
            x
        } else {
            0.0
        }
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Copy)]
pub struct Tanh;

impl ActivationFn for Tanh {
    fn f(self, x: f32) -> f32 {
        x.tanh()
    }
}

pub fn relu(x: &Tensor) -> Tensor {
    x.map(|v| Relu.f(v))
}

pub fn relu_inplace(x: &mut Tensor) {
    Activation::new(Relu).apply_inplace(x);
}

pub fn sigmoid(x: &Tensor) -> Tensor {
    x.map(|v| Sigmoid.f(v))
}

pub fn tanh(x: &Tensor) -> Tensor {
    x.map(|v| Tanh.f(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negatives() {
        let x = Tensor::from_vec(&[1, 4], vec![-2.0, -0.0, 0.5, 3.0]).unwrap();
        assert_eq!(relu(&x).as_slice(), [0.0, 0.0, 0.5, 3.0]);

        let mut y = x.clone();
        relu_inplace(&mut y);
        assert_eq!(y, relu(&x));

        let mut layer = Activation::new(Relu);
        assert_eq!(layer.forward(&x, Mode::Train).unwrap(), y);
    }

    #[test]
    fn sigmoid_and_tanh() {
        let x = Tensor::from_vec(&[3], vec![-30.0, 0.0, 30.0]).unwrap();
        let s = sigmoid(&x);
        assert!(s.as_slice()[0] < 1e-6);
        assert_eq!(s.as_slice()[1], 0.5);
        assert!((s.as_slice()[2] - 1.0).abs() < 1e-6);

        let t = tanh(&x);
        assert_eq!(t.as_slice(), [-1.0, 0.0, 1.0]);
    }
}
