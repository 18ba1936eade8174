/// Everything that can go wrong in a forward pass or while handling tensors.
///
/// All of these are caller errors: the operation is rejected before any
/// output is produced, and nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Two shapes that must agree don't: elementwise operands, the residual
    /// add, a replacement parameter, or a layer's channel/feature count.
    #[error("{op}: shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("cannot reshape {len} elements into shape {shape:?}")]
    ReshapeMismatch { len: usize, shape: Vec<usize> },

    /// Wrong number of indices, or an input tensor of the wrong rank.
    #[error("{op}: expected rank {expected}, got rank {got}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("index {index} out of bounds for axis {axis} with size {dim}")]
    IndexOutOfBounds { axis: usize, index: usize, dim: usize },

    /// The kernel/stride/padding combination leaves no valid output position
    /// for an input of this size.
    #[error(
        "{op}: no output for input size {input} with kernel {kernel}, stride {stride}, padding {padding}"
    )]
    InvalidGeometry {
        op: &'static str,
        input: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    },

    #[error("no parameter named `{0}`")]
    UnknownParameter(String),

    #[error("unsupported number of image channels: {0}")]
    UnsupportedChannels(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
