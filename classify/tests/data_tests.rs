use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::tempdir;

use classify::{DataError, DataLoader, DatasetOptions, ImageDataset};

/// Options that keep pixel values in `[0, 1]` and images tiny.
fn raw_options() -> DatasetOptions {
    DatasetOptions {
        image_size: (4, 4),
        normalize: false,
        ..DatasetOptions::default()
    }
}

fn write_solid(path: &Path, color: [u8; 3]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(4, 4, Rgb(color)).save(path).unwrap();
}

/// White on the left half, black on the right.
fn write_split(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = RgbImage::from_fn(4, 4, |x, _| if x < 2 { Rgb([255; 3]) } else { Rgb([0; 3]) });
    img.save(path).unwrap();
}

#[test]
fn discovers_classes_in_sorted_order() {
    let dir = tempdir().unwrap();
    let train = dir.path().join("train");
    write_solid(&train.join("dogs/b.png"), [0, 0, 255]);
    write_solid(&train.join("dogs/a.png"), [0, 255, 0]);
    write_solid(&train.join("cats/x.PNG"), [255, 0, 0]);
    fs::create_dir_all(train.join("birds")).unwrap();
    fs::write(train.join("cats/notes.txt"), "not an image").unwrap();

    let ds = ImageDataset::open(dir.path(), "train", raw_options()).unwrap();
    assert_eq!(ds.class_names(), ["birds", "cats", "dogs"]);
    assert_eq!(ds.num_classes(), 3);
    assert_eq!(ds.len(), 3);
    assert!(!ds.is_empty());
    assert_eq!(ds.split(), "train");

    let labels: Vec<usize> = ds.samples().iter().map(|s| s.label).collect();
    assert_eq!(labels, [1, 2, 2]);
    let cat = ds.get(0).unwrap();
    assert_eq!(cat.class_name, "cats");
    assert_eq!(cat.image.shape(), [1, 3, 4, 4]);
    // solid red: channel 0 is all ones, the others zero
    let plane = 16;
    assert!(cat.image.as_slice()[..plane].iter().all(|&v| (v - 1.0).abs() < 1e-3));
    assert!(cat.image.as_slice()[plane..].iter().all(|&v| v.abs() < 1e-3));
    // files within a class are sorted too
    assert!(ds.get(1).unwrap().path.ends_with("dogs/a.png"));

    let dist = ds.class_distribution();
    assert_eq!(dist["birds"], 0);
    assert_eq!(dist["cats"], 1);
    assert_eq!(dist["dogs"], 2);

    assert!(matches!(
        ds.get(3),
        Err(DataError::SampleIndex { index: 3, len: 3 })
    ));

    let info = ds.info().to_string();
    assert!(info.contains("Total samples: 3"));
    assert!(info.contains("dogs: 2 samples"));
    assert!(info.contains("Normalization: disabled"));
}

#[test]
fn layout_errors() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        ImageDataset::open(dir.path(), "train", raw_options()),
        Err(DataError::NotADirectory(_))
    ));

    fs::create_dir_all(dir.path().join("test")).unwrap();
    fs::write(dir.path().join("test/stray.png"), "").unwrap();
    assert!(matches!(
        ImageDataset::open(dir.path(), "test", raw_options()),
        Err(DataError::NoClasses(_))
    ));
}

#[test]
fn undecodable_images_are_skipped() {
    let dir = tempdir().unwrap();
    write_solid(&dir.path().join("train/cats/good.png"), [10, 20, 30]);
    fs::write(dir.path().join("train/cats/bad.jpg"), b"definitely not a jpeg").unwrap();
    let ds = ImageDataset::open(dir.path(), "train", raw_options()).unwrap();
    assert_eq!(ds.len(), 1);
    assert!(ds.get(0).unwrap().path.ends_with("good.png"));
}

#[test]
fn imagenet_normalization_is_default() {
    let dir = tempdir().unwrap();
    write_solid(&dir.path().join("val/cats/red.png"), [255, 0, 0]);
    let options = DatasetOptions {
        image_size: (4, 4),
        ..DatasetOptions::default()
    };
    assert!(options.normalize);
    let ds = ImageDataset::open(dir.path(), "val", options).unwrap();
    let v = ds.get(0).unwrap().image.as_slice();
    assert!((v[0] - (1.0 - 0.485) / 0.229).abs() < 1e-2);
    assert!((v[16] + 0.456 / 0.224).abs() < 1e-2);
    assert!((v[32] + 0.406 / 0.225).abs() < 1e-2);
}

/// Whether a sample's first column is darker than its last, i.e. it was
/// flipped.
fn flipped(image: &resnet18::Tensor) -> bool {
    image.at(0, 0, 0, 0).unwrap() < image.at(0, 0, 0, 3).unwrap()
}

#[test]
fn augmentation_flips_only_training_images() {
    let dir = tempdir().unwrap();
    for split in ["train", "test"] {
        for i in 0..16 {
            write_split(&dir.path().join(format!("{split}/cats/{i:02}.png")));
        }
    }
    let options = DatasetOptions {
        augment: true,
        seed: Some(3),
        ..raw_options()
    };

    let train = ImageDataset::open(dir.path(), "train", options.clone()).unwrap();
    let flips = train.samples().iter().filter(|s| flipped(&s.image)).count();
    assert!(flips > 0 && flips < 16, "{flips} of 16 flipped");

    // same seed, same flips
    let again = ImageDataset::open(dir.path(), "train", options.clone()).unwrap();
    for (a, b) in train.samples().iter().zip(again.samples()) {
        assert_eq!(a.image, b.image);
    }

    let test = ImageDataset::open(dir.path(), "test", options).unwrap();
    assert!(test.samples().iter().all(|s| !flipped(&s.image)));
}

fn five_images() -> (tempfile::TempDir, ImageDataset) {
    let dir = tempdir().unwrap();
    for i in 0..3 {
        write_solid(&dir.path().join(format!("train/a/{i}.png")), [i * 50, 0, 0]);
    }
    for i in 0..2 {
        write_solid(&dir.path().join(format!("train/b/{i}.bmp")), [0, i * 50, 0]);
    }
    let ds = ImageDataset::open(dir.path(), "train", raw_options()).unwrap();
    (dir, ds)
}

#[test]
fn sequential_batches() {
    let (_dir, ds) = five_images();
    let mut loader = DataLoader::new(&ds, 2, false, None);
    assert_eq!(loader.num_batches(), 3);
    assert_eq!(loader.current_batch(), 0);

    let mut sizes = vec![];
    let mut labels = vec![];
    while loader.has_next() {
        let batch = loader.next_batch().unwrap();
        assert_eq!(batch.images.shape(), [batch.len, 3, 4, 4]);
        sizes.push(batch.len);
        labels.extend(batch.labels);
    }
    assert_eq!(sizes, [2, 2, 1]);
    assert_eq!(labels, [0, 0, 0, 1, 1]);
    assert_eq!(loader.current_batch(), 3);
    assert!(matches!(loader.next_batch(), Err(DataError::ExhaustedInput)));

    loader.reset();
    assert_eq!(loader.current_batch(), 0);
    let first = loader.next_batch().unwrap();
    assert_eq!(first.labels, [0, 0]);
    // batch images are the samples' images laid end to end
    assert_eq!(first.image(1).unwrap(), ds.get(1).unwrap().image);
    assert!(matches!(first.image(2), Err(DataError::SampleIndex { .. })));
}

#[test]
fn seeded_shuffle_is_a_repeatable_permutation() {
    let (_dir, ds) = five_images();
    let order = |loader: DataLoader| -> Vec<Vec<f32>> {
        loader
            .flat_map(|batch| {
                let batch = batch.unwrap();
                (0..batch.len)
                    .map(|i| batch.image(i).unwrap().into_vec())
                    .collect::<Vec<_>>()
            })
            .collect()
    };

    let a = order(DataLoader::new(&ds, 2, true, Some(42)));
    let b = order(DataLoader::new(&ds, 2, true, Some(42)));
    assert_eq!(a, b);
    assert_eq!(a.len(), 5);
    for sample in ds.samples() {
        assert!(a.contains(&sample.image.as_slice().to_vec()));
    }

    let mut loader = DataLoader::new(&ds, 5, true, Some(42));
    assert_eq!(loader.num_batches(), 1);
    let first: Vec<usize> = loader.next_batch().unwrap().labels;
    assert!(!loader.has_next());
    loader.reset();
    let second = loader.next_batch().unwrap().labels;
    let mut sorted = second.clone();
    sorted.sort();
    assert_eq!(sorted, [0, 0, 0, 1, 1]);
    assert_eq!(first.len(), second.len());
}
