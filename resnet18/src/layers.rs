//! Layer kernels.
//!
//! Image layers take input of the shape `(num_images, channels, height, width)`.

use ndarray::IxDyn;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

mod activation;
mod adaptive_pool;
mod batch_norm;
mod convolutions;
mod flatten;
mod linear;
mod max_pool;
mod residual;
mod softmax;

pub use activation::{relu, relu_inplace, sigmoid, tanh, Activation, Relu, Sigmoid, Tanh};
pub use adaptive_pool::AdaptiveAvgPool2d;
pub use batch_norm::BatchNorm2d;
pub use convolutions::Conv2d;
pub use flatten::Flatten;
pub use linear::Linear;
pub use max_pool::MaxPool2d;
pub use residual::{BasicBlock, Projection};
pub use softmax::{argmax, softmax, Softmax};

/// Size of the output along one spatial axis when a `kernel`-wide window
/// slides over `input` positions plus `padding` on each side.
///
/// This is `floor((input + 2 * padding - kernel) / stride) + 1`. It is an
/// error for the window not to fit at least once.
pub fn window_output_size(
    op: &'static str,
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || kernel == 0 || padded < kernel {
        return Err(Error::InvalidGeometry {
            op,
            input,
            kernel,
            stride,
            padding,
        });
    }
    Ok((padded - kernel) / stride + 1)
}

/// Weights drawn from a normal distribution with mean 0 and standard
/// deviation `sqrt(2 / (fan_in + fan_out))` (Glorot/Xavier).
pub(crate) fn xavier_normal<R: Rng + ?Sized>(
    shape: &[usize],
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Tensor {
    let std_dev = (2.0 / (fan_in + fan_out) as f32).sqrt();
    let w = ndarray::Array::<f32, _>::random_using(IxDyn(shape), StandardNormal, rng);
    Tensor::from(w * std_dev)
}

/// Check that axis 1 of an image batch has `expected` channels.
pub(crate) fn check_channels(
    op: &'static str,
    shape: &[usize],
    expected: usize,
) -> Result<()> {
    if shape[1] != expected {
        let mut want = shape.to_vec();
        want[1] = expected;
        return Err(Error::ShapeMismatch {
            op,
            expected: want,
            got: shape.to_vec(),
        });
    }
    Ok(())
}
