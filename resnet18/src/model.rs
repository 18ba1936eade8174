//! The ResNet-18 network.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::layers::{
    argmax, relu_inplace, softmax, AdaptiveAvgPool2d, BasicBlock, BatchNorm2d, Conv2d, Flatten,
    Linear, MaxPool2d,
};
use crate::tensor::Tensor;
use crate::traits::join;
use crate::{Layer, Mode};

/// Width of the pooled feature vector fed to the classifier.
pub const FEATURE_DIM: usize = 512;

/// Output channels of the four stages.
const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

/// How to build a [`ResNet18`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResNetConfig {
    pub num_classes: usize,
    pub in_channels: usize,
    /// Number of basic blocks in each of the four stages.
    pub blocks: [usize; 4],
    pub eps: f32,
    pub momentum: f32,
    /// Seed for weight initialization. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        ResNetConfig {
            num_classes: 1000,
            in_channels: 3,
            blocks: [2, 2, 2, 2],
            eps: BatchNorm2d::DEFAULT_EPS,
            momentum: BatchNorm2d::DEFAULT_MOMENTUM,
            seed: None,
        }
    }
}

impl ResNetConfig {
    pub fn num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn blocks(mut self, blocks: [usize; 4]) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// An 18-layer residual network for image classification.
///
/// Input is a `(batch, channels, height, width)` tensor, already normalized
/// by the caller. The stem (7x7 convolution, normalization, ReLU, 3x3 max
/// pool) is followed by four stages of [`BasicBlock`]s, global average
/// pooling, a flatten, and a linear classifier.
///
/// The network starts in inference mode. In training mode every
/// normalization layer uses and updates batch statistics.
#[derive(Debug, Clone)]
pub struct ResNet18 {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    maxpool: MaxPool2d,
    stages: [Vec<BasicBlock>; 4],
    avgpool: AdaptiveAvgPool2d,
    flatten: Flatten,
    fc: Linear,
    num_classes: usize,
    training: bool,
    features_frozen: bool,
    rng: StdRng,
}

impl ResNet18 {
    /// A network with the default configuration and `num_classes` outputs.
    pub fn new(num_classes: usize) -> Self {
        Self::with_config(&ResNetConfig::default().num_classes(num_classes))
    }

    pub fn with_config(config: &ResNetConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let norm = |c| BatchNorm2d::with_params(c, config.eps, config.momentum);

        let conv1 = Conv2d::new(config.in_channels, 64, 7, &mut rng)
            .with_stride(2)
            .with_padding(3);

        let mut in_channels = 64;
        let stages: [Vec<BasicBlock>; 4] = std::array::from_fn(|i| {
            let channels = STAGE_CHANNELS[i];
            let stride = if i == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(config.blocks[i]);
            for j in 0..config.blocks[i] {
                let (stride, projection) = if j == 0 {
                    (stride, BasicBlock::needs_projection(in_channels, channels, stride))
                } else {
                    (1, false)
                };
                blocks.push(BasicBlock::with_norm(
                    in_channels,
                    channels,
                    stride,
                    projection,
                    config.eps,
                    config.momentum,
                    &mut rng,
                ));
                in_channels = channels;
            }
            blocks
        });

        let fc = Linear::new(FEATURE_DIM, config.num_classes, &mut rng);
        ResNet18 {
            conv1,
            bn1: norm(64),
            maxpool: MaxPool2d::new(3).with_stride(2).with_padding(1),
            stages,
            avgpool: AdaptiveAvgPool2d::new(1),
            flatten: Flatten,
            fc,
            num_classes: config.num_classes,
            training: false,
            features_frozen: false,
            rng,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn mode(&self) -> Mode {
        if self.training {
            Mode::Train
        } else {
            Mode::Eval
        }
    }

    /// Mark the feature extractor (everything before the classifier) as
    /// frozen. Nothing trains here yet, so this only records the flag.
    pub fn freeze_features(&mut self) {
        self.features_frozen = true;
    }

    pub fn unfreeze_all(&mut self) {
        self.features_frozen = false;
    }

    pub fn features_frozen(&self) -> bool {
        self.features_frozen
    }

    /// Swap in a freshly initialized classifier with `num_classes` outputs.
    pub fn replace_classifier(&mut self, num_classes: usize) {
        self.fc = Linear::new(FEATURE_DIM, num_classes, &mut self.rng);
        self.num_classes = num_classes;
    }

    pub fn conv1(&self) -> &Conv2d {
        &self.conv1
    }

    pub fn bn1(&self) -> &BatchNorm2d {
        &self.bn1
    }

    /// The blocks of stage `index` (0 through 3, named `layer1` through
    /// `layer4` in parameter names).
    pub fn stage(&self, index: usize) -> Option<&[BasicBlock]> {
        self.stages.get(index).map(Vec::as_slice)
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut [BasicBlock]> {
        self.stages.get_mut(index).map(Vec::as_mut_slice)
    }

    pub fn fc(&self) -> &Linear {
        &self.fc
    }

    pub fn fc_mut(&mut self) -> &mut Linear {
        &mut self.fc
    }

    /// Shape of the logits for input of the given shape.
    pub fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let mut shape = self.conv1.output_shape(input_shape)?;
        shape = self.bn1.output_shape(&shape)?;
        shape = self.maxpool.output_shape(&shape)?;
        for block in self.stages.iter().flatten() {
            shape = block.output_shape(&shape)?;
        }
        shape = self.avgpool.output_shape(&shape)?;
        shape = self.flatten.output_shape(&shape)?;
        self.fc.output_shape(&shape)
    }

    /// The pooled `(batch, 512)` feature vectors, before the classifier.
    pub fn features(&mut self, x: &Tensor) -> Result<Tensor> {
        let mode = self.mode();
        let mut x = self.conv1.forward(x, mode)?;
        x = self.bn1.forward(&x, mode)?;
        relu_inplace(&mut x);
        x = self.maxpool.forward(&x, mode)?;
        for block in self.stages.iter_mut().flatten() {
            x = block.forward(&x, mode)?;
        }
        x = self.avgpool.forward(&x, mode)?;
        self.flatten.forward(&x, mode)
    }

    /// Compute `(batch, num_classes)` logits.
    pub fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let features = self.features(x)?;
        let mode = self.mode();
        self.fc.forward(&features, mode)
    }

    /// Switch to inference mode and return the class probabilities for the
    /// first image in `x`.
    pub fn predict_probabilities(&mut self, x: &Tensor) -> Result<Vec<f32>> {
        self.set_training(false);
        let probs = softmax(&self.forward(x)?)?;
        let probs = probs.view2("predict_probabilities")?;
        if probs.nrows() == 0 {
            return Err(Error::IndexOutOfBounds {
                axis: 0,
                index: 0,
                dim: 0,
            });
        }
        Ok(probs.row(0).to_vec())
    }

    /// Index of the most probable class for the first image in `x`. Ties go
    /// to the lower index.
    pub fn predict_class(&mut self, x: &Tensor) -> Result<usize> {
        let probs = self.predict_probabilities(x)?;
        Ok(argmax(&probs))
    }

    /// Number of learnable scalars. Running statistics aren't counted.
    pub fn num_params(&self) -> usize {
        self.conv1.num_params()
            + self.bn1.num_params()
            + self
                .stages
                .iter()
                .flatten()
                .map(|b| b.num_params())
                .sum::<usize>()
            + self.fc.num_params()
    }

    /// Every parameter and running-statistics tensor, in forward order, with
    /// torchvision-style names such as `layer2.0.downsample.0.weight`.
    pub fn named_params(&self) -> Vec<(String, &Tensor)> {
        let mut out = vec![];
        self.visit_params(&mut |name, t| out.push((name, t)));
        out
    }

    fn visit_params<'a>(&'a self, f: &mut dyn FnMut(String, &'a Tensor)) {
        self.conv1.visit_params("conv1", f);
        self.bn1.visit_params("bn1", f);
        for (i, stage) in self.stages.iter().enumerate() {
            let stage_name = format!("layer{}", i + 1);
            for (j, block) in stage.iter().enumerate() {
                block.visit_params(&join(&stage_name, &j.to_string()), f);
            }
        }
        self.fc.visit_params("fc", f);
    }

    /// Replace the tensor called `name` (as listed by `named_params`). The
    /// new value must have the same shape as the old one.
    pub fn set_param(&mut self, name: &str, value: Tensor) -> Result<()> {
        let unknown = || Error::UnknownParameter(name.to_string());
        let (head, rest) = name.split_once('.').ok_or_else(unknown)?;
        let result = match head {
            "conv1" => self.conv1.set_param(rest, value),
            "bn1" => self.bn1.set_param(rest, value),
            "fc" => self.fc.set_param(rest, value),
            _ => {
                let stage = head
                    .strip_prefix("layer")
                    .and_then(|n| n.parse::<usize>().ok())
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.stages.get_mut(i))
                    .ok_or_else(unknown)?;
                let (index, rest) = rest.split_once('.').ok_or_else(unknown)?;
                let block = index
                    .parse::<usize>()
                    .ok()
                    .and_then(|j| stage.get_mut(j))
                    .ok_or_else(unknown)?;
                block.set_param(rest, value)
            }
        };
        result.map_err(|err| match err {
            // report the full dotted name, not the tail a layer saw
            Error::UnknownParameter(_) => unknown(),
            other => other,
        })
    }
}
