use rand::Rng;

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::traits::{assign, join};
use crate::{Layer, Mode};

/// A dense layer: `y = x · Wᵀ + b`.
///
/// Input shape is `(N, in_features)`, output shape is `(N, out_features)`.
#[derive(Debug, Clone)]
pub struct Linear {
    in_features: usize,
    out_features: usize,
    /// Shape `(out_features, in_features)`.
    weight: Tensor,
    /// Shape `(out_features,)`.
    bias: Option<Tensor>,
}

impl Linear {
    /// A linear layer with bias. Weights are Xavier-normal, bias is zero.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Linear {
            in_features,
            out_features,
            weight: super::xavier_normal(
                &[out_features, in_features],
                in_features,
                out_features,
                rng,
            ),
            bias: Some(Tensor::zeros(&[out_features])),
        }
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = None;
        self
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn set_weight(&mut self, weight: Tensor) -> Result<()> {
        assign(&mut self.weight, weight, "Linear::set_weight")
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Replace the bias. Fails if this layer was built without one.
    pub fn set_bias(&mut self, bias: Tensor) -> Result<()> {
        match &mut self.bias {
            Some(b) => assign(b, bias, "Linear::set_bias"),
            None => Err(Error::UnknownParameter("bias".to_string())),
        }
    }
}

impl Layer for Linear {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match *input_shape {
            [n, k] if k == self.in_features => Ok(vec![n, self.out_features]),
            [n, _] => Err(Error::ShapeMismatch {
                op: "Linear",
                expected: vec![n, self.in_features],
                got: input_shape.to_vec(),
            }),
            _ => Err(Error::RankMismatch {
                op: "Linear",
                expected: 2,
                got: input_shape.len(),
            }),
        }
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, Tensor::len)
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        self.output_shape(x.shape())?;
        let x = x.view2("Linear")?;
        let w = self.weight.view2("Linear")?;
        let mut y = x.dot(&w.t());
        if let Some(b) = &self.bias {
            y += &b.view();
        }
        Ok(Tensor::from(y))
    }

    fn visit_params<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(String, &'a Tensor)) {
        f(join(prefix, "weight"), &self.weight);
        if let Some(b) = &self.bias {
            f(join(prefix, "bias"), b);
        }
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        match name {
            "weight" => Some(&mut self.weight),
            "bias" => self.bias.as_mut(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn layer(i: usize, o: usize) -> Linear {
        Linear::new(i, o, &mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn affine_transform() {
        let mut fc = layer(3, 2);
        fc.set_weight(Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 0.0, -1.0, 0.5]).unwrap())
            .unwrap();
        fc.set_bias(Tensor::from_vec(&[2], vec![0.25, -1.0]).unwrap())
            .unwrap();
        let x = Tensor::from_vec(&[2, 3], vec![1.0, 1.0, 1.0, 2.0, 0.0, -2.0]).unwrap();
        let y = fc.forward(&x, Mode::Eval).unwrap();
        assert_eq!(y.shape(), [2, 2]);
        assert_eq!(y.as_slice(), [6.25, -1.5, -3.75, -2.0]);
    }

    #[test]
    fn no_bias() {
        let mut fc = layer(4, 3).without_bias();
        assert_eq!(fc.num_params(), 12);
        assert!(fc.bias().is_none());
        assert!(fc.set_bias(Tensor::zeros(&[3])).is_err());
        let y = fc.forward(&Tensor::zeros(&[5, 4]), Mode::Eval).unwrap();
        assert_eq!(y, Tensor::zeros(&[5, 3]));
    }

    #[test]
    fn shape_checks() {
        let mut fc = layer(4, 3);
        assert_eq!(fc.num_params(), 15);
        assert!(matches!(
            fc.forward(&Tensor::zeros(&[1, 5]), Mode::Eval),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            fc.forward(&Tensor::zeros(&[1, 4, 1, 1]), Mode::Eval),
            Err(Error::RankMismatch { expected: 2, got: 4, .. })
        ));
        assert!(fc.set_weight(Tensor::zeros(&[4, 3])).is_err());
    }

    #[test]
    fn named_params() {
        let fc = layer(2, 2);
        let names: Vec<String> = fc.named_params().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["weight", "bias"]);
    }
}
