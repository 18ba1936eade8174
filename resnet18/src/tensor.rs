//! Dense `f32` tensors with row-major strides.

use std::fmt;

use ndarray::prelude::*;
use ndarray::IxDyn;

use crate::error::{Error, Result};

/// An owned, contiguous, row-major array of `f32`.
///
/// Invariants: `data.len()` is the product of `shape`, and `strides` is
/// always derived from `shape` (the last axis has stride 1).
///
/// Cloning copies the whole buffer. [`Tensor::take`] moves the contents out
/// and leaves an empty tensor of shape `[0]` behind.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<f32>,
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor {
            shape: vec![0],
            strides: vec![1],
            data: vec![],
        }
    }
}

impl Tensor {
    /// A zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Shorthand for a zero-filled `(batch, channels, height, width)` tensor.
    pub fn zeros4(b: usize, c: usize, h: usize, w: usize) -> Self {
        Self::zeros(&[b, c, h, w])
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        let len = shape.iter().product();
        Tensor {
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            data: vec![value; len],
        }
    }

    /// Wrap `data`, which must hold exactly `product(shape)` elements in
    /// row-major order.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::ReshapeMismatch {
                len: data.len(),
                shape: shape.to_vec(),
            });
        }
        Ok(Tensor {
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Move the contents out, leaving `self` empty.
    pub fn take(&mut self) -> Tensor {
        std::mem::take(self)
    }

    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Reinterpret the buffer with a new shape. The element order is
    /// unchanged; only the shape and strides are updated.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<()> {
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(Error::ReshapeMismatch {
                len: self.data.len(),
                shape: shape.to_vec(),
            });
        }
        self.shape = shape.to_vec();
        self.strides = row_major_strides(shape);
        Ok(())
    }

    /// Consuming version of [`Tensor::reshape`].
    pub fn into_shape(mut self, shape: &[usize]) -> Result<Self> {
        self.reshape(shape)?;
        Ok(self)
    }

    /// Translate a multi-index into a flat buffer offset.
    pub fn offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.shape.len() {
            return Err(Error::RankMismatch {
                op: "index",
                expected: self.shape.len(),
                got: index.len(),
            });
        }
        let mut offset = 0;
        for (axis, ((&i, &dim), &stride)) in index
            .iter()
            .zip(&self.shape)
            .zip(&self.strides)
            .enumerate()
        {
            if i >= dim {
                return Err(Error::IndexOutOfBounds {
                    axis,
                    index: i,
                    dim,
                });
            }
            offset += i * stride;
        }
        Ok(offset)
    }

    pub fn get(&self, index: &[usize]) -> Result<f32> {
        Ok(self.data[self.offset(index)?])
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Result<&mut f32> {
        let i = self.offset(index)?;
        Ok(&mut self.data[i])
    }

    pub fn set(&mut self, index: &[usize], value: f32) -> Result<()> {
        *self.get_mut(index)? = value;
        Ok(())
    }

    /// Read element `(b, c, h, w)` of a rank-4 tensor.
    pub fn at(&self, b: usize, c: usize, h: usize, w: usize) -> Result<f32> {
        self.get(&[b, c, h, w])
    }

    /// Write element `(b, c, h, w)` of a rank-4 tensor.
    pub fn set_at(&mut self, b: usize, c: usize, h: usize, w: usize, value: f32) -> Result<()> {
        self.set(&[b, c, h, w], value)
    }

    /// The `(batch, channels, height, width)` extents of a rank-4 tensor.
    pub fn dims4(&self, op: &'static str) -> Result<(usize, usize, usize, usize)> {
        match *self.shape {
            [b, c, h, w] => Ok((b, c, h, w)),
            _ => Err(Error::RankMismatch {
                op,
                expected: 4,
                got: self.shape.len(),
            }),
        }
    }

    /// The `(rows, columns)` extents of a rank-2 tensor.
    pub fn dims2(&self, op: &'static str) -> Result<(usize, usize)> {
        match *self.shape {
            [n, k] => Ok((n, k)),
            _ => Err(Error::RankMismatch {
                op,
                expected: 2,
                got: self.shape.len(),
            }),
        }
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        ArrayView::from_shape(IxDyn(&self.shape), &self.data)
            .expect("buffer length should match shape")
    }

    pub fn view_mut(&mut self) -> ArrayViewMutD<'_, f32> {
        ArrayViewMut::from_shape(IxDyn(&self.shape), &mut self.data)
            .expect("buffer length should match shape")
    }

    pub fn view2(&self, op: &'static str) -> Result<ArrayView2<'_, f32>> {
        let dims = self.dims2(op)?;
        Ok(ArrayView::from_shape(dims, &self.data).expect("buffer length should match shape"))
    }

    pub fn view4(&self, op: &'static str) -> Result<ArrayView4<'_, f32>> {
        let dims = self.dims4(op)?;
        Ok(ArrayView::from_shape(dims, &self.data).expect("buffer length should match shape"))
    }

    pub fn view4_mut(&mut self, op: &'static str) -> Result<ArrayViewMut4<'_, f32>> {
        let dims = self.dims4(op)?;
        Ok(ArrayViewMut::from_shape(dims, &mut self.data)
            .expect("buffer length should match shape"))
    }

    fn check_same_shape(&self, other: &Tensor, op: &'static str) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                op,
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    fn zip_with(&self, other: &Tensor, op: &'static str, f: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
        self.check_same_shape(other, op)?;
        Ok(Tensor {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Elementwise sum. The shapes must be identical; there is no broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// In-place elementwise sum.
    pub fn add_assign(&mut self, other: &Tensor) -> Result<()> {
        self.check_same_shape(other, "add_assign")?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        for x in &mut self.data {
            *x = f(*x);
        }
    }
}

impl<D: Dimension> From<Array<f32, D>> for Tensor {
    fn from(array: Array<f32, D>) -> Self {
        let shape = array.shape().to_vec();
        let data = match array.as_slice() {
            Some(slice) => slice.to_vec(),
            None => array.iter().copied().collect(),
        };
        Tensor {
            strides: row_major_strides(&shape),
            shape,
            data,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .finish()
    }
}

/// Formats the shape, e.g. `(1, 3, 224, 224)`.
impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}
