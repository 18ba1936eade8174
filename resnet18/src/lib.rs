//! ResNet-18 inference on the CPU.
//!
//! [`Tensor`] is a dense `f32` array in row-major order. Layers in
//! [`layers`] implement [`Layer`]; [`ResNet18`] wires them into the network.

mod error;
pub use error::{Error, Result};

mod tensor;
pub use tensor::Tensor;

#[cfg(feature = "image")]
mod imaging;

mod traits;
pub use traits::{ActivationFn, Layer, Mode};

pub mod layers;
pub use layers::{argmax, relu, relu_inplace, sigmoid, softmax, tanh};

mod model;
pub use model::{ResNet18, ResNetConfig, FEATURE_DIM};
