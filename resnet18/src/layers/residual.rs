//! The ResNet basic block.

use rand::Rng;

use super::{relu_inplace, BatchNorm2d, Conv2d};
use crate::error::Result;
use crate::tensor::Tensor;
use crate::traits::join;
use crate::{Layer, Mode};

/// Projection shortcut: a 1x1 convolution followed by batch normalization,
/// used when a block changes the channel count or the spatial size.
#[derive(Debug, Clone)]
pub struct Projection {
    pub conv: Conv2d,
    pub bn: BatchNorm2d,
}

impl Projection {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        bn: BatchNorm2d,
        rng: &mut R,
    ) -> Self {
        Projection {
            conv: Conv2d::new(in_channels, out_channels, 1, rng).with_stride(stride),
            bn,
        }
    }
}

impl Layer for Projection {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let hidden = self.conv.output_shape(input_shape)?;
        self.bn.output_shape(&hidden)
    }

    fn num_params(&self) -> usize {
        self.conv.num_params() + self.bn.num_params()
    }

    fn forward(&mut self, x: &Tensor, mode: Mode) -> Result<Tensor> {
        let y = self.conv.forward(x, mode)?;
        self.bn.forward(&y, mode)
    }

    fn visit_params<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(String, &'a Tensor)) {
        self.conv.visit_params(&join(prefix, "0"), f);
        self.bn.visit_params(&join(prefix, "1"), f);
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        match name.split_once('.')? {
            ("0", rest) => self.conv.param_mut(rest),
            ("1", rest) => self.bn.param_mut(rest),
            _ => None,
        }
    }
}

/// Two 3x3 convolutions with a shortcut around them:
///
/// ```text
/// out = relu(bn2(conv2(relu(bn1(conv1(x))))) + shortcut(x))
/// ```
///
/// `conv1` carries the block's stride. The shortcut is the identity, or a
/// [`Projection`] when the block has one.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub conv1: Conv2d,
    pub bn1: BatchNorm2d,
    pub conv2: Conv2d,
    pub bn2: BatchNorm2d,
    pub downsample: Option<Projection>,
}

impl BasicBlock {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        projection: bool,
        rng: &mut R,
    ) -> Self {
        Self::with_norm(
            in_channels,
            out_channels,
            stride,
            projection,
            BatchNorm2d::DEFAULT_EPS,
            BatchNorm2d::DEFAULT_MOMENTUM,
            rng,
        )
    }

    /// Like `new`, with the given epsilon and momentum for every
    /// normalization layer in the block.
    pub fn with_norm<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        projection: bool,
        eps: f32,
        momentum: f32,
        rng: &mut R,
    ) -> Self {
        let norm = || BatchNorm2d::with_params(out_channels, eps, momentum);
        let conv1 = Conv2d::new(in_channels, out_channels, 3, rng)
            .with_stride(stride)
            .with_padding(1);
        let conv2 = Conv2d::new(out_channels, out_channels, 3, rng).with_padding(1);
        let downsample =
            projection.then(|| Projection::new(in_channels, out_channels, stride, norm(), rng));
        BasicBlock {
            conv1,
            bn1: norm(),
            conv2,
            bn2: norm(),
            downsample,
        }
    }

    /// Whether the identity shortcut can't be added to the block's output
    /// as is.
    pub fn needs_projection(in_channels: usize, out_channels: usize, stride: usize) -> bool {
        stride != 1 || in_channels != out_channels
    }

    pub fn has_projection(&self) -> bool {
        self.downsample.is_some()
    }
}

impl Layer for BasicBlock {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let hidden = self.bn1.output_shape(&self.conv1.output_shape(input_shape)?)?;
        let out = self.bn2.output_shape(&self.conv2.output_shape(&hidden)?)?;
        if let Some(p) = &self.downsample {
            p.output_shape(input_shape)?;
        }
        Ok(out)
    }

    fn num_params(&self) -> usize {
        self.conv1.num_params()
            + self.bn1.num_params()
            + self.conv2.num_params()
            + self.bn2.num_params()
            + self.downsample.as_ref().map_or(0, |p| p.num_params())
    }

    fn forward(&mut self, x: &Tensor, mode: Mode) -> Result<Tensor> {
        let mut out = self.conv1.forward(x, mode)?;
        out = self.bn1.forward(&out, mode)?;
        relu_inplace(&mut out);
        out = self.conv2.forward(&out, mode)?;
        out = self.bn2.forward(&out, mode)?;

        match &mut self.downsample {
            Some(p) => out.add_assign(&p.forward(x, mode)?)?,
            None => out.add_assign(x)?,
        }
        relu_inplace(&mut out);
        Ok(out)
    }

    fn visit_params<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(String, &'a Tensor)) {
        self.conv1.visit_params(&join(prefix, "conv1"), f);
        self.bn1.visit_params(&join(prefix, "bn1"), f);
        self.conv2.visit_params(&join(prefix, "conv2"), f);
        self.bn2.visit_params(&join(prefix, "bn2"), f);
        if let Some(p) = &self.downsample {
            p.visit_params(&join(prefix, "downsample"), f);
        }
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        let (head, rest) = name.split_once('.')?;
        match head {
            "conv1" => self.conv1.param_mut(rest),
            "bn1" => self.bn1.param_mut(rest),
            "conv2" => self.conv2.param_mut(rest),
            "bn2" => self.bn2.param_mut(rest),
            "downsample" => self.downsample.as_mut()?.param_mut(rest),
            _ => None,
        }
    }
}
