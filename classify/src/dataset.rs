//! Directory-based image classification datasets.
//!
//! A dataset root holds one directory per split, and each split holds one
//! directory per class:
//!
//! ```text
//! data/animals/
//!   train/
//!     cats/ 001.jpg 002.png ...
//!     dogs/ ...
//!   test/
//!     cats/ ...
//!     dogs/ ...
//! ```
//!
//! Labels are indices into the sorted list of class directory names.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use resnet18::Tensor;
use tracing::{debug, info, warn};

use crate::error::{io_error, DataError, Result};

/// Image file extensions the loader accepts, compared case-insensitively.
pub const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Per-channel RGB mean of the ImageNet training set.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel RGB standard deviation of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// True if `path` has one of the accepted image extensions.
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted names of the subdirectories of `dir`.
pub fn class_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = vec![];
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Sorted paths of the image files directly inside `dir`.
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// How images are turned into tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOptions {
    /// Every image is resized to this `(width, height)`.
    pub image_size: (u32, u32),
    /// Subtract [`IMAGENET_MEAN`] and divide by [`IMAGENET_STD`] per channel.
    pub normalize: bool,
    /// Randomly flip training images horizontally, with probability 1/2.
    /// Has no effect on other splits.
    pub augment: bool,
    /// Seed for augmentation. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        DatasetOptions {
            image_size: (224, 224),
            normalize: true,
            augment: false,
            seed: None,
        }
    }
}

/// One decoded image and its label.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Shape `(1, 3, height, width)`.
    pub image: Tensor,
    pub label: usize,
    pub class_name: String,
    pub path: PathBuf,
}

/// All the images of one split, decoded up front.
#[derive(Debug)]
pub struct ImageDataset {
    split: String,
    options: DatasetOptions,
    class_names: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageDataset {
    /// Scan `root/split/` and decode every image in it.
    ///
    /// Files that fail to decode are skipped with a warning. A split with
    /// class directories but no images is an empty dataset, not an error.
    pub fn open(root: impl AsRef<Path>, split: &str, options: DatasetOptions) -> Result<Self> {
        let split_dir = root.as_ref().join(split);
        if !split_dir.is_dir() {
            return Err(DataError::NotADirectory(split_dir));
        }

        let class_names = class_dirs(&split_dir)?;
        if class_names.is_empty() {
            return Err(DataError::NoClasses(split_dir));
        }
        info!(split, classes = ?class_names, "found {} classes", class_names.len());

        let mut entries = vec![];
        for (label, name) in class_names.iter().enumerate() {
            for path in image_files(&split_dir.join(name))? {
                entries.push((path, label));
            }
        }

        // Flips are drawn up front so a seeded run doesn't depend on how
        // rayon schedules the decoding.
        let augment = options.augment && split == "train";
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let flips: Vec<bool> = entries
            .iter()
            .map(|_| augment && rng.gen_bool(0.5))
            .collect();

        let decoded: Vec<Result<Tensor>> = entries
            .par_iter()
            .zip(flips.par_iter())
            .map(|((path, _), &flip)| load_image(path, &options, flip))
            .collect();

        let mut samples = Vec::with_capacity(entries.len());
        for ((path, label), image) in entries.into_iter().zip(decoded) {
            match image {
                Ok(image) => samples.push(Sample {
                    image,
                    label,
                    class_name: class_names[label].clone(),
                    path,
                }),
                Err(err) => warn!(path = %path.display(), "skipping image: {err}"),
            }
        }
        info!(split, "loaded {} samples", samples.len());

        Ok(ImageDataset {
            split: split.to_string(),
            options,
            class_names,
            samples,
        })
    }

    pub fn split(&self) -> &str {
        &self.split
    }

    pub fn options(&self) -> &DatasetOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Sample> {
        self.samples.get(index).ok_or(DataError::SampleIndex {
            index,
            len: self.samples.len(),
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Class names in label order.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Number of samples in each class. Classes with no images are listed
    /// with a count of 0.
    pub fn class_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.class_names.iter().map(|name| (name.clone(), 0)).collect();
        for sample in &self.samples {
            *counts.entry(sample.class_name.clone()).or_default() += 1;
        }
        counts
    }

    /// A printable summary of the dataset.
    pub fn info(&self) -> DatasetInfo<'_> {
        DatasetInfo(self)
    }
}

/// Summary returned by [`ImageDataset::info`].
pub struct DatasetInfo<'a>(&'a ImageDataset);

impl fmt::Display for DatasetInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ds = self.0;
        let enabled = |on| if on { "enabled" } else { "disabled" };
        let (w, h) = ds.options.image_size;
        writeln!(f, "=== Dataset Information ===")?;
        writeln!(f, "Split: {}", ds.split)?;
        writeln!(f, "Total samples: {}", ds.len())?;
        writeln!(f, "Number of classes: {}", ds.num_classes())?;
        writeln!(f, "Image size: {w}x{h}")?;
        writeln!(f, "Normalization: {}", enabled(ds.options.normalize))?;
        writeln!(f, "Augmentation: {}", enabled(ds.options.augment))?;
        writeln!(f)?;
        write!(f, "Class distribution:")?;
        for (name, count) in ds.class_distribution() {
            write!(f, "\n  {name}: {count} samples")?;
        }
        Ok(())
    }
}

/// Decode, resize, optionally flip, and optionally normalize one image.
fn load_image(path: &Path, options: &DatasetOptions, flip: bool) -> Result<Tensor> {
    let img = image::open(path).map_err(|source| DataError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let (w, h) = options.image_size;
    let mut img = img.resize_exact(w, h, FilterType::Triangle);
    if flip {
        img = img.fliph();
    }
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut tensor = Tensor::from_image(&rgb)?;
    if options.normalize {
        normalize(&mut tensor);
    }
    debug!(path = %path.display(), flip, "decoded image");
    Ok(tensor)
}

/// Standardize each channel of a `(1, 3, h, w)` tensor with the ImageNet
/// constants.
pub fn normalize(image: &mut Tensor) {
    let plane = image.len() / IMAGENET_MEAN.len();
    for (c, values) in image.as_mut_slice().chunks_mut(plane).enumerate() {
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        for v in values {
            *v = (*v - mean) / std;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions() {
        assert!(is_image(Path::new("a/b.jpg")));
        assert!(is_image(Path::new("b.JPEG")));
        assert!(is_image(Path::new("c.Png")));
        assert!(is_image(Path::new("d.bmp")));
        assert!(!is_image(Path::new("e.gif")));
        assert!(!is_image(Path::new("README")));
    }

    #[test]
    fn imagenet_normalization() {
        let mut t = Tensor::from_vec(&[1, 3, 1, 2], vec![0.485, 1.0, 0.456, 0.0, 0.406, 0.5])
            .unwrap();
        normalize(&mut t);
        let v = t.as_slice();
        assert!(v[0].abs() < 1e-6);
        assert!((v[1] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!(v[2].abs() < 1e-6);
        assert!((v[3] + 0.456 / 0.224).abs() < 1e-5);
        assert!((v[5] - (0.5 - 0.406) / 0.225).abs() < 1e-5);
    }
}
