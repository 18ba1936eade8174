use std::io;
use std::path::PathBuf;

/// Errors from loading and batching an image dataset.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dataset path does not exist or is not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("no class subdirectories in {0:?}")]
    NoClasses(PathBuf),

    #[error("failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no more batches available")]
    ExhaustedInput,

    #[error("sample index {index} out of range for a dataset of {len} samples")]
    SampleIndex { index: usize, len: usize },

    #[error(transparent)]
    Tensor(#[from] resnet18::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> DataError {
    let path = path.into();
    move |source| DataError::Io { path, source }
}
