//! Max pooling.

use super::window_output_size;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::{Layer, Mode};

/// Max pooling operation for image data.
///
/// The input shape is `(num_images, num_channels, height, width)`. Window
/// positions that fall in the padding are skipped rather than read as zero,
/// so padding never wins the max.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

impl MaxPool2d {
    /// Non-overlapping pooling: the stride defaults to the kernel size, with
    /// no padding.
    pub fn new(kernel_size: usize) -> Self {
        assert!(kernel_size > 0);
        MaxPool2d {
            kernel_size,
            stride: kernel_size,
            padding: 0,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        assert!(stride > 0);
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }
}

impl Layer for MaxPool2d {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let &[xn, xc, xh, xw] = input_shape else {
            return Err(Error::RankMismatch {
                op: "MaxPool2d",
                expected: 4,
                got: input_shape.len(),
            });
        };
        let (k, s, p) = (self.kernel_size, self.stride, self.padding);
        let oh = window_output_size("MaxPool2d", xh, k, s, p)?;
        let ow = window_output_size("MaxPool2d", xw, k, s, p)?;
        Ok(vec![xn, xc, oh, ow])
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        let output_shape = self.output_shape(x.shape())?;
        let (_, _, xh, xw) = x.dims4("MaxPool2d")?;
        let (oh, ow) = (output_shape[2], output_shape[3]);
        let (k, s, p) = (self.kernel_size, self.stride, self.padding);

        let mut y = Tensor::full(&output_shape, f32::MIN);
        if xh * xw == 0 {
            // every window lies in the padding
            return Ok(y);
        }
        // one (image, channel) plane at a time
        for (src, dst) in x
            .as_slice()
            .chunks(xh * xw)
            .zip(y.as_mut_slice().chunks_mut(oh * ow))
        {
            for oy in 0..oh {
                // window rows clipped to the image
                let top = (oy * s).saturating_sub(p).min(xh);
                let bottom = (oy * s + k).saturating_sub(p).min(xh).max(top);
                for ox in 0..ow {
                    let left = (ox * s).saturating_sub(p).min(xw);
                    let right = (ox * s + k).saturating_sub(p).min(xw).max(left);
                    let mut max = f32::MIN;
                    for row in src[top * xw..bottom * xw].chunks(xw) {
                        max = row[left..right].iter().copied().fold(max, f32::max);
                    }
                    dst[oy * ow + ox] = max;
                }
            }
        }
        Ok(y)
    }
}
