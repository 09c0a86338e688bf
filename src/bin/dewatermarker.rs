use std::path::{Path, PathBuf};
use std::process;

use burn::backend::ndarray::NdArrayDevice;
use burn::tensor::backend::Backend;
use clap::{Args, Parser, Subcommand};

use dewatermarker::{
    build_dataset, export_datapoint, load_images, load_watermark, Architecture, Checkpoint,
    CompositeOptions, DatasetReader, Error, TrainOptions, Trainer, TrainingBackend,
    DEFAULT_DATASET_PATH,
};

#[derive(Parser)]
#[command(
    name = "dewatermarker",
    about = "Build watermarked training pairs and train an autoencoder to remove the watermark",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Watermark a directory of images and serialize the pairs
    Build(BuildArgs),
    /// Train an autoencoder on a serialized dataset
    Train(TrainArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Watermark image (alpha channel is used as the paste mask)
    #[arg(short, long)]
    watermark: PathBuf,

    /// Directory of source images
    #[arg(short, long)]
    images: PathBuf,

    /// Output dataset file
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    output: PathBuf,

    /// Watermark fits within 1/ratio of each image dimension
    #[arg(short, long, default_value = "2")]
    ratio: u32,

    /// Also write each pair as image files into this directory
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset file produced by `build`
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    dataset: PathBuf,

    /// Architecture variant (0, 1 or 2)
    #[arg(short, long, default_value = "1")]
    arch: usize,

    /// Number of epochs
    #[arg(short, long, default_value = "2000")]
    epochs: usize,

    /// Mini-batch size
    #[arg(short, long, default_value = "4")]
    batch_size: usize,

    /// Data-loading worker threads
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Adam learning rate
    #[arg(long, default_value = "0.001")]
    lr: f64,

    /// Directory holding the arch_N checkpoints
    #[arg(long, default_value = ".")]
    checkpoint_dir: PathBuf,

    /// Write the first reconstruction of each report epoch here
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Seed for weight initialisation and shuffling
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let outcome = match &cli.command {
        Command::Build(args) => run_build(args, cli.quiet),
        Command::Train(args) => run_train(args, cli.quiet),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_build(args: &BuildArgs, quiet: bool) -> Result<(), Error> {
    let watermark = load_watermark(&args.watermark)?;
    let images = load_images(&args.images)?;
    if images.is_empty() && !quiet {
        eprintln!("WARNING: no supported images in {}", args.images.display());
    }

    let opts = CompositeOptions {
        ratio: args.ratio,
        ..CompositeOptions::default()
    };
    let dataset = build_dataset(&watermark, &images, &opts)?;
    dataset.save(&args.output)?;

    if let Some(dir) = &args.export {
        for (i, datapoint) in dataset.datapoints.iter().enumerate() {
            export_datapoint(dir, &format!("{i:05}.png"), datapoint)?;
        }
    }

    if !quiet {
        eprintln!(
            "[OK] {} datapoints -> {}",
            dataset.len(),
            args.output.display()
        );
    }
    Ok(())
}

fn run_train(args: &TrainArgs, quiet: bool) -> Result<(), Error> {
    let Some(arch) = Architecture::from_index(args.arch) else {
        eprintln!("Error: --arch must be 0, 1 or 2");
        process::exit(1);
    };

    let reader = DatasetReader::open(&args.dataset)?;
    let [height, width, channels] = reader.input_shape().ok_or(Error::EmptyDataset)?;
    let config = arch.config(channels);
    for (name, edge) in [("height", height), ("width", width)] {
        if config.output_size(edge) != Some(edge) {
            eprintln!(
                "Error: image {name} {edge}px is too small for {arch:?} (minimum {}px)",
                config.min_input_size()
            );
            process::exit(1);
        }
    }

    if let Some(seed) = args.seed {
        TrainingBackend::seed(seed);
    }
    let device = NdArrayDevice::Cpu;
    let checkpoint = arch.checkpoint_path(&args.checkpoint_dir);
    let (model, status) = config
        .init::<TrainingBackend>(&device)
        .load(&checkpoint, &device)?;
    if status == Checkpoint::Restored && !quiet {
        eprintln!("Resuming from {}", display_stem(&checkpoint));
    }

    let opts = TrainOptions {
        epochs: args.epochs,
        batch_size: args.batch_size,
        num_workers: args.workers,
        learning_rate: args.lr,
        seed: args.seed,
        preview_path: args.preview.clone(),
        ..TrainOptions::default()
    };
    let trainer = Trainer::<TrainingBackend>::new(opts, device);
    let (_, report) = trainer.run(model, &reader, &checkpoint)?;

    if !quiet {
        let saves = report.checkpoints.iter().filter(|c| c.saved).count();
        eprintln!();
        eprintln!(
            "[Summary] Epochs: {}, Best loss: {}, Checkpoints written: {saves}",
            report.epochs, report.best_loss
        );
    }
    Ok(())
}

fn display_stem(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}
