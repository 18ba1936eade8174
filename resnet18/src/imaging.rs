//! Conversions between decoded images and `(1, C, H, W)` tensors.

use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::{Error, Result};
use crate::tensor::Tensor;

impl Tensor {
    /// Convert a decoded image into a `(1, C, H, W)` tensor with values in
    /// `[0, 1]`. Grayscale images give one channel, RGB images three; any
    /// other channel layout (e.g. with alpha) is rejected, so callers that
    /// want RGB should convert first.
    pub fn from_image(img: &DynamicImage) -> Result<Tensor> {
        let (w, h) = (img.width() as usize, img.height() as usize);
        match img.color().channel_count() {
            1 => {
                let gray = img.to_luma8();
                let data = gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
                Tensor::from_vec(&[1, 1, h, w], data)
            }
            3 => {
                let rgb = img.to_rgb8();
                let raw = rgb.as_raw();
                // interleaved HWC to planar CHW
                let plane = h * w;
                let mut data = vec![0.0; 3 * plane];
                for (i, px) in raw.chunks_exact(3).enumerate() {
                    for (c, &v) in px.iter().enumerate() {
                        data[c * plane + i] = v as f32 / 255.0;
                    }
                }
                Tensor::from_vec(&[1, 3, h, w], data)
            }
            n => Err(Error::UnsupportedChannels(n as usize)),
        }
    }

    /// Convert a `(1, C, H, W)` tensor with `C` of 1 or 3 back to an 8-bit
    /// image. Values are scaled by 255 and clamped.
    pub fn to_image(&self) -> Result<DynamicImage> {
        let (b, c, h, w) = self.dims4("to_image")?;
        if b != 1 {
            return Err(Error::ShapeMismatch {
                op: "to_image",
                expected: vec![1, c, h, w],
                got: self.shape().to_vec(),
            });
        }
        let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
        let plane = h * w;
        let data = self.as_slice();
        match c {
            1 => {
                let raw = data.iter().map(|&v| to_u8(v)).collect();
                let img = GrayImage::from_raw(w as u32, h as u32, raw)
                    .expect("buffer length should match image size");
                Ok(DynamicImage::ImageLuma8(img))
            }
            3 => {
                let mut raw = Vec::with_capacity(3 * plane);
                for i in 0..plane {
                    for ch in 0..3 {
                        raw.push(to_u8(data[ch * plane + i]));
                    }
                }
                let img = RgbImage::from_raw(w as u32, h as u32, raw)
                    .expect("buffer length should match image size");
                Ok(DynamicImage::ImageRgb8(img))
            }
            n => Err(Error::UnsupportedChannels(n)),
        }
    }
}
