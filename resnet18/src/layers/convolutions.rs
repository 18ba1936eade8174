//! Convolutions for image processing.
//!
//! Convolution layers take input of the shape `(num_images, in_channels, height, width)`.
//!
//! Convolution kernels have the shape `(out_channels, in_channels, kernel_size, kernel_size)`.

use rand::Rng;

use super::{check_channels, window_output_size};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::traits::{assign, join};
use crate::{Layer, Mode};

/// Copy `images` into the middle of a larger zero-filled tensor, adding
/// `padding` rows/columns on every side of each image.
fn pad2d(images: &Tensor, padding: usize) -> Result<Tensor> {
    let (n, c, h, w) = images.dims4("pad2d")?;
    let (ph, pw) = (h + 2 * padding, w + 2 * padding);
    let mut padded = Tensor::zeros4(n, c, ph, pw);
    let src = images.as_slice();
    let dst = padded.as_mut_slice();
    for plane in 0..n * c {
        for y in 0..h {
            let from = &src[(plane * h + y) * w..][..w];
            let to = &mut dst[(plane * ph + y + padding) * pw + padding..][..w];
            to.copy_from_slice(from);
        }
    }
    Ok(padded)
}

/// Convolve `images` with `kernel` in 2D, as needed for a convolutional
/// neural network. No padding is applied here.
///
/// The shape of `images` is `(num_images, in_channels, img_height, img_width)`.
/// The shape of `kernel` is `(out_channels, in_channels, k, k)`.
/// The shape of `z` is `(num_images, out_channels, out_height, out_width)`
/// and must already be computed for `stride`. `z` is accumulated into, not
/// overwritten.
fn conv2d_impl(images: &Tensor, kernel: &Tensor, stride: usize, z: &mut Tensor) -> Result<()> {
    let (xn, xc, xh, xw) = images.dims4("conv2d")?;
    let (kn, kc, kh, kw) = kernel.dims4("conv2d")?;
    let (zn, zc, zh, zw) = z.dims4("conv2d")?;
    assert_eq!(kc, xc, "incompatible number of channels: images={xc}, kernel={kc}");
    assert_eq!((zn, zc), (xn, kn));
    assert!((zh - 1) * stride + kh <= xh && (zw - 1) * stride + kw <= xw);

    let x = images.as_slice();
    let k = kernel.as_slice();
    let out = z.as_mut_slice();
    for t in 0..xn {
        for oc in 0..kn {
            let out_plane = &mut out[(t * zc + oc) * zh * zw..][..zh * zw];
            for ic in 0..xc {
                let in_plane = &x[(t * xc + ic) * xh * xw..][..xh * xw];
                let filter = &k[(oc * kc + ic) * kh * kw..][..kh * kw];
                for j in 0..kh {
                    for i in 0..kw {
                        let weight = filter[j * kw + i];
                        for y in 0..zh {
                            let row = &in_plane[(y * stride + j) * xw + i..];
                            let out_row = &mut out_plane[y * zw..][..zw];
                            for (x, o) in out_row.iter_mut().enumerate() {
                                *o += weight * row[x * stride];
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// 2D convolution with a square kernel, stride, and symmetric zero padding.
///
/// Each output channel may also get a bias, a constant added to each pixel of
/// that channel. There is no dilation and no grouping.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    /// Shape `(out_channels, in_channels, kernel_size, kernel_size)`.
    weight: Tensor,
    /// Shape `(out_channels,)`.
    bias: Option<Tensor>,
}

impl Conv2d {
    /// Create a convolutional layer with stride 1, no padding and no bias.
    ///
    /// For example, to use 64 3x3 filters on an RGB image, use
    /// `Conv2d::new(3, 64, 3, rng)`.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        rng: &mut R,
    ) -> Self {
        assert!(kernel_size > 0);
        let area = kernel_size * kernel_size;
        Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: 0,
            weight: super::xavier_normal(
                &[out_channels, in_channels, kernel_size, kernel_size],
                in_channels * area,
                out_channels * area,
                rng,
            ),
            bias: None,
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

    /// Add a zero-initialized bias.
    pub fn with_bias(mut self) -> Self {
        self.bias = Some(Tensor::zeros(&[self.out_channels]));
        self
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
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

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn set_weight(&mut self, weight: Tensor) -> Result<()> {
        assign(&mut self.weight, weight, "Conv2d::set_weight")
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Replace the bias. Fails if this layer was built without one.
    pub fn set_bias(&mut self, bias: Tensor) -> Result<()> {
        match &mut self.bias {
            Some(b) => assign(b, bias, "Conv2d::set_bias"),
            None => Err(Error::UnknownParameter("bias".to_string())),
        }
    }
}

impl Layer for Conv2d {
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let &[xn, _, xh, xw] = input_shape else {
            return Err(Error::RankMismatch {
                op: "Conv2d",
                expected: 4,
                got: input_shape.len(),
            });
        };
        check_channels("Conv2d", input_shape, self.in_channels)?;
        let (k, s, p) = (self.kernel_size, self.stride, self.padding);
        let oh = window_output_size("Conv2d", xh, k, s, p)?;
        let ow = window_output_size("Conv2d", xw, k, s, p)?;
        Ok(vec![xn, self.out_channels, oh, ow])
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, Tensor::len)
    }

    fn forward(&mut self, x: &Tensor, _mode: Mode) -> Result<Tensor> {
        let output_shape = self.output_shape(x.shape())?;
        let mut y = Tensor::zeros(&output_shape);
        if self.padding > 0 {
            let padded = pad2d(x, self.padding)?;
            conv2d_impl(&padded, &self.weight, self.stride, &mut y)?;
        } else {
            conv2d_impl(x, &self.weight, self.stride, &mut y)?;
        }
        if let Some(bias) = &self.bias {
            let plane = output_shape[2] * output_shape[3];
            for (i, chunk) in y.as_mut_slice().chunks_mut(plane).enumerate() {
                let b = bias.as_slice()[i % self.out_channels];
                chunk.iter_mut().for_each(|v| *v += b);
            }
        }
        Ok(y)
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

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn iota(shape: &[usize]) -> Tensor {
        let n = shape.iter().product::<usize>();
        Tensor::from_vec(shape, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    /// Direct transcription of the definition, one output cell at a time.
    fn reference_conv(x: &Tensor, conv: &Conv2d) -> Tensor {
        let (n, c, h, w) = x.dims4("ref").unwrap();
        let shape = conv.output_shape(x.shape()).unwrap();
        let (k, s, p) = (conv.kernel_size, conv.stride, conv.padding as isize);
        let mut y = Tensor::zeros(&shape);
        for b in 0..n {
            for oc in 0..shape[1] {
                for oy in 0..shape[2] {
                    for ox in 0..shape[3] {
                        let mut acc = conv.bias().map_or(0.0, |b| b.as_slice()[oc]);
                        for ic in 0..c {
                            for j in 0..k {
                                for i in 0..k {
                                    let iy = (oy * s + j) as isize - p;
                                    let ix = (ox * s + i) as isize - p;
                                    if iy >= 0 && ix >= 0 && (iy as usize) < h && (ix as usize) < w {
                                        acc += x.at(b, ic, iy as usize, ix as usize).unwrap()
                                            * conv.weight.at(oc, ic, j, i).unwrap();
                                    }
                                }
                            }
                        }
                        y.set_at(b, oc, oy, ox, acc).unwrap();
                    }
                }
            }
        }
        y
    }

    #[test]
    fn stem_geometry() {
        let conv = Conv2d::new(3, 64, 7, &mut rng()).with_stride(2).with_padding(3);
        assert_eq!(conv.output_shape(&[1, 3, 224, 224]).unwrap(), [1, 64, 112, 112]);
        assert_eq!(conv.num_params(), 64 * 3 * 49);
        assert!(matches!(
            conv.output_shape(&[1, 4, 224, 224]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn kernel_larger_than_input() {
        let mut conv = Conv2d::new(1, 1, 5, &mut rng());
        assert!(matches!(
            conv.forward(&Tensor::zeros4(1, 1, 3, 3), Mode::Eval),
            Err(Error::InvalidGeometry { input: 3, kernel: 5, .. })
        ));
    }

    #[test]
    fn ones_kernel_sums_window() {
        let mut conv = Conv2d::new(1, 1, 2, &mut rng());
        conv.set_weight(Tensor::full(&[1, 1, 2, 2], 1.0)).unwrap();
        let y = conv.forward(&iota(&[1, 1, 3, 3]), Mode::Eval).unwrap();
        assert_eq!(y.shape(), [1, 1, 2, 2]);
        assert_eq!(y.as_slice(), [8.0, 12.0, 20.0, 24.0]);
    }

    #[test]
    fn zero_padding() {
        let mut conv = Conv2d::new(1, 1, 3, &mut rng()).with_padding(1);
        conv.set_weight(Tensor::full(&[1, 1, 3, 3], 1.0)).unwrap();
        let y = conv.forward(&Tensor::full(&[1, 1, 2, 2], 1.0), Mode::Eval).unwrap();
        assert_eq!(y.shape(), [1, 1, 2, 2]);
        assert_eq!(y.as_slice(), [4.0; 4]);
    }

    #[test]
    fn bias_per_channel() {
        let mut conv = Conv2d::new(1, 2, 1, &mut rng()).with_bias();
        conv.set_weight(Tensor::zeros(&[2, 1, 1, 1])).unwrap();
        conv.set_bias(Tensor::from_vec(&[2], vec![1.5, -2.0]).unwrap()).unwrap();
        let y = conv.forward(&iota(&[2, 1, 2, 1]), Mode::Eval).unwrap();
        assert_eq!(y.as_slice(), [1.5, 1.5, -2.0, -2.0, 1.5, 1.5, -2.0, -2.0]);
        assert_eq!(conv.num_params(), 4);
    }

    #[test]
    fn matches_reference() {
        let mut r = rng();
        let x = Tensor::from(ndarray::Array::from_shape_fn((2, 3, 9, 8), |(a, b, c, d)| {
            ((a * 7 + b * 5 + c * 3 + d) % 11) as f32 - 5.0
        }));
        for (k, s, p) in [(3, 1, 1), (3, 2, 1), (1, 2, 0), (7, 2, 3), (2, 3, 0)] {
            let mut conv = Conv2d::new(3, 4, k, &mut r)
                .with_stride(s)
                .with_padding(p)
                .with_bias();
            conv.set_bias(Tensor::from_vec(&[4], vec![0.1, 0.2, -0.3, 0.0]).unwrap())
                .unwrap();
            let expected = reference_conv(&x, &conv);
            let got = conv.forward(&x, Mode::Eval).unwrap();
            assert_eq!(got.shape(), expected.shape());
            for (a, b) in got.as_slice().iter().zip(expected.as_slice()) {
                assert!((a - b).abs() < 1e-4, "k={k} s={s} p={p}: {a} vs {b}");
            }
        }
    }
}
