use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use classify::dataset::{class_dirs, image_files};
use classify::{DataLoader, DatasetOptions, ImageDataset};
use resnet18::{argmax, ResNet18, ResNetConfig};

const DEFAULT_DATA_ROOT: &str = "data/animals";
const FALLBACK_DATA_ROOT: &str = "../data/animals";

#[derive(Parser)]
#[command(about = "Run a ResNet-18 classifier over an image-folder dataset", long_about = None)]
struct Options {
    /// Dataset root with `train/` and `test/` splits, one folder per class;
    /// default is data/animals, or ../data/animals if that doesn't exist
    #[arg(long, value_name = "DIR")]
    data_root: Option<PathBuf>,

    /// Class names, in the order of the network's outputs
    #[arg(long, value_delimiter = ',', default_value = "cats,dogs")]
    classes: Vec<String>,

    /// Images per batch
    #[arg(long, default_value_t = 2)]
    batch_size: usize,

    /// Images are resized to N x N
    #[arg(long, value_name = "N", default_value_t = 224)]
    image_size: u32,

    /// Seed for weight initialization, shuffling, and augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Randomly flip training images horizontally
    #[arg(long)]
    augment: bool,

    /// Classify the whole test split and report accuracy
    #[arg(long)]
    evaluate: bool,
}

fn print_banner() {
    println!("========================================");
    println!("       ResNet-18 Image Classifier       ");
    println!("========================================");
}

fn print_setup_instructions(data_root: &Path, classes: &[String]) {
    println!("\n--- Setup Instructions ---");
    println!("1. Create the directory structure:");
    for split in ["train", "test"] {
        for class in classes {
            println!("   mkdir -p {}", data_root.join(split).join(class).display());
        }
    }
    println!("2. Add .jpg, .jpeg, .png, or .bmp images to each folder");
    println!("3. Run the program again");
}

/// Report on the expected `split/class` layout under `data_root`. Returns
/// false if a split directory is missing.
fn check_directory_structure(data_root: &Path, classes: &[String]) -> bool {
    println!("\n--- Checking Directory Structure ---");
    if let Ok(cwd) = env::current_dir() {
        println!("Current working directory: {}", cwd.display());
    }
    println!("Data root: {}", data_root.display());

    if !data_root.is_dir() {
        println!("ERROR: data root directory does not exist");
        return false;
    }
    for split in ["train", "test"] {
        if !data_root.join(split).is_dir() {
            println!("ERROR: {split} directory does not exist");
            return false;
        }
        println!("OK: {split} directory exists");
    }

    for split in ["train", "test"] {
        let split_dir = data_root.join(split);
        println!("\nChecking {split} directory:");
        match class_dirs(&split_dir) {
            Ok(found) => {
                for extra in found.iter().filter(|name| !classes.contains(*name)) {
                    warn!(split, class = %extra, "directory is not one of the configured classes");
                }
            }
            Err(err) => warn!(split, "{err}"),
        }
        for class in classes {
            let class_dir = split_dir.join(class);
            if !class_dir.is_dir() {
                println!("ERROR: {} does not exist", class_dir.display());
                continue;
            }
            match image_files(&class_dir) {
                Ok(images) => {
                    println!("OK: {} - {} images", class_dir.display(), images.len());
                    if images.is_empty() {
                        warn!(dir = %class_dir.display(), "no images found");
                    }
                }
                Err(err) => println!("ERROR: {err}"),
            }
        }
    }
    true
}

/// Classify every image of the test split, in batches, and print the
/// accuracy.
fn evaluate(model: &mut ResNet18, data_root: &Path, opts: &Options) -> Result<()> {
    let classes = &opts.classes;
    println!("\n--- Evaluating on the test split ---");
    let dataset_options = DatasetOptions {
        image_size: (opts.image_size, opts.image_size),
        seed: opts.seed,
        ..DatasetOptions::default()
    };
    let test = ImageDataset::open(data_root, "test", dataset_options)
        .context("failed to load the test split")?;
    if test.is_empty() {
        bail!("no images in the test split");
    }

    model.set_training(false);
    let progress = ProgressBar::new(test.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} images [{elapsed_precise}] {msg}")?
    );

    let mut correct = 0;
    for batch in DataLoader::new(&test, opts.batch_size, false, None) {
        let batch = batch?;
        let logits = model.forward(&batch.images)?;
        for (row, &label) in logits.as_slice().chunks(classes.len()).zip(&batch.labels) {
            if classes[argmax(row)] == test.class_names()[label] {
                correct += 1;
            }
        }
        progress.inc(batch.len as u64);
    }
    progress.finish_with_message("done");

    let accuracy = correct as f64 / test.len() as f64;
    println!("Accuracy: {correct}/{} = {:.2}%", test.len(), accuracy * 100.0);
    Ok(())
}

fn run(opts: &Options) -> Result<()> {
    print_banner();
    if opts.classes.is_empty() {
        bail!("at least one class is required");
    }

    let data_root = match &opts.data_root {
        Some(root) => root.clone(),
        None => {
            let mut root = PathBuf::from(DEFAULT_DATA_ROOT);
            if !root.exists() {
                root = PathBuf::from(FALLBACK_DATA_ROOT);
                info!("trying alternative path: {}", root.display());
            }
            root
        }
    };

    let layout_ok = check_directory_structure(&data_root, &opts.classes);

    let mut config = ResNetConfig::default().num_classes(opts.classes.len());
    config.seed = opts.seed;
    let mut model = ResNet18::with_config(&config);
    println!(
        "\nResNet-18 model initialized with {} classes: {}",
        opts.classes.len(),
        opts.classes.join(" ")
    );
    info!(params = model.num_params(), "model ready");

    if !layout_ok {
        println!("\nCannot test data loading: directories don't exist");
        print_setup_instructions(&data_root, &opts.classes);
        return Ok(());
    }

    println!("\n--- Testing Data Loading ---");
    let dataset_options = DatasetOptions {
        image_size: (opts.image_size, opts.image_size),
        augment: opts.augment,
        seed: opts.seed,
        ..DatasetOptions::default()
    };
    let train = ImageDataset::open(&data_root, "train", dataset_options)
        .context("failed to load the training split")?;
    println!("{}", train.info());

    if train.is_empty() {
        println!("\nERROR: no images found in the training split");
        print_setup_instructions(&data_root, &opts.classes);
        return Ok(());
    }

    let mut loader = DataLoader::new(&train, opts.batch_size, true, opts.seed);
    let batch = loader.next_batch()?;
    println!("\nLoaded first batch:");
    println!("   Batch size: {}", batch.len);
    println!("   Image shape: {}", batch.images);

    println!("\n--- Testing Model Forward Pass ---");
    model.set_training(false);
    let image = batch.image(0)?;
    let output = model.forward(&image)?;
    println!("Output shape: {output}");

    let probabilities = model.predict_probabilities(&image)?;
    let predicted = model.predict_class(&image)?;
    println!("Prediction results:");
    println!("  Predicted class: {}", opts.classes[predicted]);
    println!("  Confidence: {:.3}%", probabilities[predicted] * 100.0);

    if opts.evaluate {
        evaluate(&mut model, &data_root, opts)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(&Options::parse())
}
