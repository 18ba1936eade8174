//! Image-folder datasets and batching for the `resnet18` network.

mod error;
pub use error::{DataError, Result};

pub mod dataset;
pub use dataset::{DatasetOptions, ImageDataset, Sample};

pub mod loader;
pub use loader::{Batch, DataLoader};
