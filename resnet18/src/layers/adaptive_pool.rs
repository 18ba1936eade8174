use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::{Layer, Mode};

/// Average pooling to a fixed `size × size` output, whatever the input's
/// spatial size.
///
/// Output cell `(oy, ox)` averages the input rows `oy*H/S .. (oy+1)*H/S` and
/// columns `ox*W/S .. (ox+1)*W/S` (floor division), so bins can differ in
/// size by one when `S` doesn't divide the input. A bin with no elements,
/// which happens only when `S` exceeds the input size, averages to 0.
#[derive(Debug, Clone)]
pub struct AdaptiveAvgPool2d {
    size: usize,
}

impl AdaptiveAvgPool2d {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "adaptive pool output size must be at least 1");
        AdaptiveAvgPool2d { size }
    }

    pub fn output_size(&self) -> usize {
        self.size
    }

    fn bin(&self, index: usize, extent: usize) -> (usize, usize) {
        (index * extent / self.size, (index + 1) * extent / self.size)
    }
}

impl Layer for AdaptiveAvgPool2d {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match *input_shape {
            [n, c, _, _] => Ok(vec![n, c, self.size, self.size]),
            _ => Err(Error::RankMismatch {
                op: "AdaptiveAvgPool2d",
                expected: 4,
                got: input_shape.len(),
            }),
        }
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        let output_shape = self.output_shape(x.shape())?;
        let (_, _, xh, xw) = x.dims4("AdaptiveAvgPool2d")?;
        let s = self.size;

        let mut y = Tensor::zeros(&output_shape);
        if xh * xw == 0 {
            // all bins are empty
            return Ok(y);
        }
        for (src, dst) in x
            .as_slice()
            .chunks(xh * xw)
            .zip(y.as_mut_slice().chunks_mut(s * s))
        {
            for oy in 0..s {
                let (top, bottom) = self.bin(oy, xh);
                for ox in 0..s {
                    let (left, right) = self.bin(ox, xw);
                    let count = (bottom - top) * (right - left);
                    if count == 0 {
                        continue;
                    }
                    let sum: f32 = (top..bottom)
                        .map(|row| src[row * xw + left..row * xw + right].iter().sum::<f32>())
                        .sum();
                    dst[oy * s + ox] = sum / count as f32;
                }
            }
        }
        Ok(y)
    }
}
