//! Batching and shuffling over an [`ImageDataset`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use resnet18::Tensor;

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};

/// A mini-batch of images and their labels.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Shape `(len, 3, height, width)`.
    pub images: Tensor,
    pub labels: Vec<usize>,
    pub len: usize,
}

impl Batch {
    /// The `i`th image of the batch as a `(1, 3, height, width)` tensor.
    pub fn image(&self, i: usize) -> Result<Tensor> {
        if i >= self.len {
            return Err(DataError::SampleIndex {
                index: i,
                len: self.len,
            });
        }
        let shape = self.images.shape();
        let per_image = self.images.len() / self.len;
        let data = self.images.as_slice()[i * per_image..][..per_image].to_vec();
        Ok(Tensor::from_vec(&[1, shape[1], shape[2], shape[3]], data)?)
    }
}

/// Walks a dataset in batches, one epoch at a time.
///
/// When shuffling is on, the visiting order is reshuffled on creation and on
/// every [`reset`](DataLoader::reset). The last batch of an epoch is short if
/// the batch size doesn't divide the dataset.
#[derive(Debug)]
pub struct DataLoader<'a> {
    dataset: &'a ImageDataset,
    batch_size: usize,
    shuffle: bool,
    indices: Vec<usize>,
    position: usize,
    current_batch: usize,
    rng: StdRng,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a ImageDataset, batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        assert!(batch_size > 0, "batch size must be at least 1");
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut loader = DataLoader {
            dataset,
            batch_size,
            shuffle,
            indices: (0..dataset.len()).collect(),
            position: 0,
            current_batch: 0,
            rng,
        };
        if shuffle {
            loader.indices.shuffle(&mut loader.rng);
        }
        loader
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per epoch, counting a final short batch.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Number of batches handed out so far this epoch.
    pub fn current_batch(&self) -> usize {
        self.current_batch
    }

    pub fn has_next(&self) -> bool {
        self.position < self.indices.len()
    }

    pub fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next() {
            return Err(DataError::ExhaustedInput);
        }
        let end = (self.position + self.batch_size).min(self.indices.len());
        let chosen = &self.indices[self.position..end];

        let first = &self.dataset.get(chosen[0])?.image;
        let mut shape = first.shape().to_vec();
        shape[0] = chosen.len();
        let mut data = Vec::with_capacity(first.len() * chosen.len());
        let mut labels = Vec::with_capacity(chosen.len());
        for &i in chosen {
            let sample = self.dataset.get(i)?;
            data.extend_from_slice(sample.image.as_slice());
            labels.push(sample.label);
        }
        let images = Tensor::from_vec(&shape, data)?;

        self.position = end;
        self.current_batch += 1;
        Ok(Batch {
            images,
            len: labels.len(),
            labels,
        })
    }

    /// Start a new epoch.
    pub fn reset(&mut self) {
        self.position = 0;
        self.current_batch = 0;
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.has_next().then(|| self.next_batch())
    }
}
