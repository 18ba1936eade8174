use ndarray::prelude::*;

use super::check_channels;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::traits::{assign, join};
use crate::{Layer, Mode};

/// Per-channel batch normalization for `(N, C, H, W)` input.
///
/// In `Mode::Train` each channel is normalized with the mean and (biased)
/// variance of that channel over `(N, H, W)`, and the running statistics are
/// moved toward the batch statistics:
///
/// ```text
/// running = (1 - momentum) * running + momentum * batch
/// ```
///
/// In `Mode::Eval` the running statistics are used instead and nothing is
/// updated. Either way the normalized value is then scaled and shifted per
/// channel.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    num_features: usize,
    eps: f32,
    momentum: f32,
    /// Learnable scale (gamma), initialized to 1.
    weight: Tensor,
    /// Learnable shift (beta), initialized to 0.
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
}

impl BatchNorm2d {
    pub const DEFAULT_EPS: f32 = 1e-5;
    pub const DEFAULT_MOMENTUM: f32 = 0.1;

    pub fn new(num_features: usize) -> Self {
        Self::with_params(num_features, Self::DEFAULT_EPS, Self::DEFAULT_MOMENTUM)
    }

    pub fn with_params(num_features: usize, eps: f32, momentum: f32) -> Self {
        BatchNorm2d {
            num_features,
            eps,
            momentum,
            weight: Tensor::full(&[num_features], 1.0),
            bias: Tensor::zeros(&[num_features]),
            running_mean: Tensor::zeros(&[num_features]),
            running_var: Tensor::full(&[num_features], 1.0),
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn set_weight(&mut self, weight: Tensor) -> Result<()> {
        assign(&mut self.weight, weight, "BatchNorm2d::set_weight")
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn set_bias(&mut self, bias: Tensor) -> Result<()> {
        assign(&mut self.bias, bias, "BatchNorm2d::set_bias")
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn set_running_mean(&mut self, mean: Tensor) -> Result<()> {
        assign(&mut self.running_mean, mean, "BatchNorm2d::set_running_mean")
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    pub fn set_running_var(&mut self, var: Tensor) -> Result<()> {
        assign(&mut self.running_var, var, "BatchNorm2d::set_running_var")
    }

    /// Per-channel mean and biased variance over the batch and spatial axes.
    fn batch_statistics(x: ArrayView4<'_, f32>) -> (Vec<f32>, Vec<f32>) {
        x.axis_iter(Axis(1))
            .map(|channel| {
                let mean = channel.mean().unwrap_or(0.0);
                let var = channel.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
                (mean, var)
            })
            .unzip()
    }
}

impl Layer for BatchNorm2d {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        if input_shape.len() != 4 {
            return Err(Error::RankMismatch {
                op: "BatchNorm2d",
                expected: 4,
                got: input_shape.len(),
            });
        }
        check_channels("BatchNorm2d", input_shape, self.num_features)?;
        Ok(input_shape.to_vec())
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn forward(&mut self, x: &Tensor, mode: Mode) -> Result<Tensor> {
        self.output_shape(x.shape())?;

        let (mean, var) = match mode {
            Mode::Train => {
                let (mean, var) = Self::batch_statistics(x.view4("BatchNorm2d")?);
                let m = self.momentum;
                for (r, &b) in self.running_mean.as_mut_slice().iter_mut().zip(&mean) {
                    *r = (1.0 - m) * *r + m * b;
                }
                for (r, &b) in self.running_var.as_mut_slice().iter_mut().zip(&var) {
                    *r = (1.0 - m) * *r + m * b;
                }
                (mean, var)
            }
            Mode::Eval => (
                self.running_mean.as_slice().to_vec(),
                self.running_var.as_slice().to_vec(),
            ),
        };

        let mut y = x.clone();
        let mut yv = y.view4_mut("BatchNorm2d")?;
        for (c, mut channel) in yv.axis_iter_mut(Axis(1)).enumerate() {
            let (m, g, b) = (mean[c], self.weight.as_slice()[c], self.bias.as_slice()[c]);
            let std_dev = (var[c] + self.eps).sqrt();
            channel.mapv_inplace(|v| g * ((v - m) / std_dev) + b);
        }
        Ok(y)
    }

    fn visit_params<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(String, &'a Tensor)) {
        f(join(prefix, "weight"), &self.weight);
        f(join(prefix, "bias"), &self.bias);
        f(join(prefix, "running_mean"), &self.running_mean);
        f(join(prefix, "running_var"), &self.running_var);
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        match name {
            "weight" => Some(&mut self.weight),
            "bias" => Some(&mut self.bias),
            "running_mean" => Some(&mut self.running_mean),
            "running_var" => Some(&mut self.running_var),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two images, two channels, 1x2 pixels each.
    fn sample() -> Tensor {
        Tensor::from_vec(
            &[2, 2, 1, 2],
            vec![
                1.0, 3.0, 10.0, 10.0, // image 0: channel 0, channel 1
                5.0, 7.0, 20.0, 20.0, // image 1
            ],
        )
        .unwrap()
    }

    #[test]
    fn fresh_layer_in_eval_is_identity() {
        let mut bn = BatchNorm2d::new(2);
        let x = sample();
        let y = bn.forward(&x, Mode::Eval).unwrap();
        for (a, b) in x.as_slice().iter().zip(y.as_slice()) {
            assert!((a - b).abs() <= a.abs() * 1e-5, "{a} vs {b}");
        }
        assert_eq!(bn.running_mean().as_slice(), [0.0, 0.0]);
        assert_eq!(bn.running_var().as_slice(), [1.0, 1.0]);
    }

    #[test]
    fn train_uses_batch_statistics() {
        let mut bn = BatchNorm2d::with_params(2, 0.0, 0.1);
        let y = bn.forward(&sample(), Mode::Train).unwrap();
        // channel 0: mean 4, variance 5
        let s = 5.0f32.sqrt();
        let expected0 = [-3.0 / s, -1.0 / s, 1.0 / s, 3.0 / s];
        let got0 = [
            y.at(0, 0, 0, 0).unwrap(),
            y.at(0, 0, 0, 1).unwrap(),
            y.at(1, 0, 0, 0).unwrap(),
            y.at(1, 0, 0, 1).unwrap(),
        ];
        for (a, b) in got0.iter().zip(expected0) {
            assert!((a - b).abs() < 1e-6);
        }
        // channel 1: mean 15, variance 25
        assert!((y.at(0, 1, 0, 0).unwrap() + 1.0).abs() < 1e-6);
        assert!((y.at(1, 1, 0, 1).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn running_statistics_update() {
        let mut bn = BatchNorm2d::new(2);
        bn.set_running_mean(Tensor::from_vec(&[2], vec![2.0, 0.0]).unwrap()).unwrap();
        bn.forward(&sample(), Mode::Train).unwrap();
        let mean = bn.running_mean().as_slice();
        let var = bn.running_var().as_slice();
        // 0.9 * old + 0.1 * batch
        assert!((mean[0] - (0.9 * 2.0 + 0.1 * 4.0)).abs() < 1e-5);
        assert!((mean[1] - 1.5).abs() < 1e-5);
        assert!((var[0] - (0.9 + 0.5)).abs() < 1e-5);
        assert!((var[1] - (0.9 + 2.5)).abs() < 1e-5);

        // eval leaves them alone
        let before = bn.clone();
        bn.forward(&sample(), Mode::Eval).unwrap();
        assert_eq!(bn.running_mean(), before.running_mean());
        assert_eq!(bn.running_var(), before.running_var());
    }

    #[test]
    fn eval_uses_running_statistics_and_affine() {
        let mut bn = BatchNorm2d::with_params(2, 0.0, 0.1);
        bn.set_running_mean(Tensor::from_vec(&[2], vec![1.0, 10.0]).unwrap()).unwrap();
        bn.set_running_var(Tensor::from_vec(&[2], vec![4.0, 1.0]).unwrap()).unwrap();
        bn.set_weight(Tensor::from_vec(&[2], vec![2.0, 1.0]).unwrap()).unwrap();
        bn.set_bias(Tensor::from_vec(&[2], vec![0.5, -1.0]).unwrap()).unwrap();
        let y = bn.forward(&sample(), Mode::Eval).unwrap();
        assert_eq!(y.as_slice(), [0.5, 2.5, -1.0, -1.0, 4.5, 6.5, 9.0, 9.0]);
    }

    #[test]
    fn channel_and_shape_checks() {
        let mut bn = BatchNorm2d::new(3);
        assert!(matches!(
            bn.forward(&sample(), Mode::Eval),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            bn.forward(&Tensor::zeros(&[2, 3]), Mode::Eval),
            Err(Error::RankMismatch { .. })
        ));
        assert!(bn.set_running_var(Tensor::zeros(&[2])).is_err());
        assert_eq!(bn.num_params(), 6);
        assert_eq!(bn.named_params().len(), 4);
    }
}
