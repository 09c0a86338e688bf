//! Build watermarked image pairs and train an autoencoder to undo the watermark.
//!
//! A watermark is shrunk to fit half of each target image and alpha-pasted in
//! its top-left corner. The (original, watermarked) pairs are serialized as a
//! single dataset blob, and a small convolutional autoencoder learns to map
//! the watermarked images back to their originals.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use dewatermarker::{build_dataset, load_images, load_watermark, CompositeOptions};
//!
//! let watermark = load_watermark(Path::new("logo.png")).unwrap();
//! let images = load_images(Path::new("photos/")).unwrap();
//! let dataset = build_dataset(&watermark, &images, &CompositeOptions::default()).unwrap();
//! dataset.save(Path::new("data/training/set.bin")).unwrap();
//! ```
//!
//! # Training
//!
//! ```no_run
//! use std::path::Path;
//! use burn::backend::ndarray::NdArrayDevice;
//! use dewatermarker::{Architecture, DatasetReader, TrainOptions, Trainer, TrainingBackend};
//!
//! let device = NdArrayDevice::Cpu;
//! let reader = DatasetReader::open(Path::new("data/training/set.bin")).unwrap();
//! let [_, _, channels] = reader.input_shape().unwrap();
//!
//! let arch = Architecture::Arch1;
//! let checkpoint = arch.checkpoint_path(Path::new("."));
//! let (model, _) = arch
//!     .config(channels)
//!     .init::<TrainingBackend>(&device)
//!     .load(&checkpoint, &device)
//!     .unwrap();
//!
//! let trainer = Trainer::<TrainingBackend>::new(TrainOptions::default(), device);
//! let (_, report) = trainer.run(model, &reader, &checkpoint).unwrap();
//! println!("best loss: {}", report.best_loss);
//! ```

#![deny(missing_docs)]

pub mod compositor;
pub mod dataset;
pub mod error;
mod io;
pub mod loader;
pub mod model;
pub mod train;

pub use compositor::{apply_watermark, CompositeOptions};
pub use dataset::{
    build_dataset, export_datapoint, load_images, Datapoint, Dataset, DatasetReader, ImageArray,
    DEFAULT_DATASET_PATH,
};
pub use error::{Error, Result};
pub use io::{is_supported_image, load_watermark, save_image};
pub use model::{to_channels_first, Architecture, Autoencoder, AutoencoderConfig, Checkpoint};
pub use train::{TrainOptions, TrainReport, Trainer};

/// CPU backend with automatic differentiation, used for training.
pub type TrainingBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
