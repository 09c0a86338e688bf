//! Training loop.
//!
//! Each epoch walks the dataset in mini-batches, reconstructs the watermarked
//! images and minimises the mean squared error against the originals with
//! Adam. On the first epoch and every `checkpoint_every` epochs after it the
//! last batch's loss is reported and, if it beats every earlier report, the
//! model is saved.

use std::path::{Path, PathBuf};

use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::dataset::{Datapoint, DatasetReader};
use crate::error::{Error, Result};
use crate::io::save_image;
use crate::loader::BatchLoader;
use crate::model::{tensor_to_image, to_channels_first, Autoencoder};

/// Hyperparameters and side outputs of a training run.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Passes over the dataset.
    pub epochs: usize,
    /// Samples per optimizer step.
    pub batch_size: usize,
    /// Reshuffle sample order every epoch.
    pub shuffle: bool,
    /// Threads fetching samples.
    pub num_workers: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// L2 penalty applied by Adam.
    pub weight_decay: f32,
    /// Report/checkpoint on epoch 0 and every multiple of this.
    pub checkpoint_every: usize,
    /// Shuffle seed; entropy from the OS when `None`.
    pub seed: Option<u64>,
    /// Where to write the first reconstructed image of each report.
    pub preview_path: Option<PathBuf>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 2000,
            batch_size: 4,
            shuffle: true,
            num_workers: 4,
            learning_rate: 1e-3,
            weight_decay: 1e-5,
            checkpoint_every: 100,
            seed: None,
            preview_path: None,
        }
    }
}

/// One report epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEvent {
    /// Zero-based epoch.
    pub epoch: usize,
    /// Loss of the epoch's last batch.
    pub loss: f32,
    /// Whether the model was written to disk.
    pub saved: bool,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Epochs completed.
    pub epochs: usize,
    /// Lowest reported loss, `f32::INFINITY` if nothing was reported.
    pub best_loss: f32,
    /// Every report epoch in order.
    pub checkpoints: Vec<CheckpointEvent>,
}

/// Drives an [`Autoencoder`] through a training run.
pub struct Trainer<B: AutodiffBackend> {
    opts: TrainOptions,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer running on `device`.
    pub fn new(opts: TrainOptions, device: B::Device) -> Self {
        Self { opts, device }
    }

    /// Whether `epoch` is a report epoch.
    #[must_use]
    pub fn is_report_epoch(&self, epoch: usize) -> bool {
        epoch == 0 || (self.opts.checkpoint_every > 0 && epoch % self.opts.checkpoint_every == 0)
    }

    /// Train `model` on `reader`, saving improvements to `checkpoint`.
    ///
    /// Returns the trained model and a report.
    ///
    /// # Errors
    ///
    /// Fails on an empty dataset, mismatched image shapes within a batch,
    /// or when a checkpoint or preview cannot be written.
    pub fn run<F>(
        &self,
        mut model: Autoencoder<B>,
        reader: &DatasetReader<F>,
        checkpoint: &Path,
    ) -> Result<(Autoencoder<B>, TrainReport)>
    where
        F: Fn(Datapoint) -> Datapoint + Sync,
    {
        if reader.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let loader = BatchLoader::new(
            self.opts.batch_size,
            self.opts.shuffle,
            self.opts.num_workers,
        )?;
        let mut rng = match self.opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut optimizer = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(self.opts.weight_decay)))
            .init::<B, Autoencoder<B>>();
        let criterion = MseLoss::new();

        let mut report = TrainReport {
            epochs: 0,
            best_loss: f32::INFINITY,
            checkpoints: Vec::new(),
        };

        for epoch in 0..self.opts.epochs {
            let mut last: Option<(f32, Tensor<B, 4>)> = None;

            for indices in loader.batch_indices(reader.len(), &mut rng) {
                let batch = loader.load_batch(reader, &indices)?;
                let original = to_channels_first::<B>(&batch.original, &self.device);
                let watermarked = to_channels_first::<B>(&batch.watermarked, &self.device);

                let output = model.forward(watermarked);
                let loss = criterion.forward(output.clone(), original, Reduction::Mean);
                let loss_value = loss.clone().into_scalar().elem::<f32>();
                log::debug!("epoch {epoch}: batch of {} loss {loss_value}", indices.len());

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.opts.learning_rate, model, grads);
                last = Some((loss_value, output));
            }
            report.epochs = epoch + 1;

            if !self.is_report_epoch(epoch) {
                continue;
            }
            let Some((loss, output)) = last else {
                continue;
            };

            log::info!(">> epoch # {epoch}: {loss}");
            if let Some(path) = &self.opts.preview_path {
                if let Some(img) = tensor_to_image(&output, 0)? {
                    save_image(&img, path)?;
                }
            }

            // Compared on the last batch only, not an epoch mean.
            let saved = loss < report.best_loss;
            if saved {
                log::info!(">> updating weights.");
                model.save(checkpoint)?;
                report.best_loss = loss;
            }
            report.checkpoints.push(CheckpointEvent { epoch, loss, saved });
        }

        Ok((model, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn trainer(checkpoint_every: usize) -> Trainer<TestBackend> {
        let opts = TrainOptions {
            checkpoint_every,
            ..TrainOptions::default()
        };
        Trainer::new(opts, NdArrayDevice::Cpu)
    }

    #[test]
    fn report_epochs_are_first_and_multiples() {
        let t = trainer(100);
        assert!(t.is_report_epoch(0));
        assert!(!t.is_report_epoch(1));
        assert!(!t.is_report_epoch(99));
        assert!(t.is_report_epoch(100));
        assert!(t.is_report_epoch(300));

        let only_first = trainer(0);
        assert!(only_first.is_report_epoch(0));
        assert!(!only_first.is_report_epoch(100));
    }

    #[test]
    fn defaults_match_published_hyperparameters() {
        let opts = TrainOptions::default();
        assert_eq!(opts.epochs, 2000);
        assert_eq!(opts.batch_size, 4);
        assert!(opts.shuffle);
        assert_eq!(opts.num_workers, 4);
        assert!((opts.learning_rate - 1e-3).abs() < f64::EPSILON);
        assert!((opts.weight_decay - 1e-5).abs() < f32::EPSILON);
        assert_eq!(opts.checkpoint_every, 100);
    }
}
