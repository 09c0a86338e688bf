//! Convolutional autoencoder.
//!
//! The network is a stack of unpadded `Conv2d` layers (kernel 3, stride 1),
//! each followed by ReLU, mirrored by `ConvTranspose2d` layers that restore
//! the original spatial size and channel count. Every encoder layer trims
//! `kernel - 1` pixels from each spatial dimension and every decoder layer
//! adds them back, so the output always has the input's shape.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::record::{FileRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{Error, Result};
use crate::loader::HostBatch;

/// Kernel size shared by every published architecture.
pub const KERNEL_SIZE: usize = 3;
/// Stride shared by every published architecture.
pub const STRIDE: usize = 1;

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// The published autoencoder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// One layer: `c -> 6`.
    Arch0,
    /// Three layers: `c -> 6 -> 12 -> 24`.
    Arch1,
    /// Three wide layers: `c -> 64 -> 128 -> 256`.
    Arch2,
}

impl Architecture {
    /// All variants, in index order.
    pub const ALL: [Self; 3] = [Self::Arch0, Self::Arch1, Self::Arch2];

    /// Variant by numeric index (`0`, `1` or `2`).
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn widths(self) -> &'static [usize] {
        match self {
            Self::Arch0 => &[6],
            Self::Arch1 => &[6, 12, 24],
            Self::Arch2 => &[64, 128, 256],
        }
    }

    /// Builder for this variant on images with `input_channels` channels.
    #[must_use]
    pub fn config(self, input_channels: usize) -> AutoencoderConfig {
        let mut layers = Vec::with_capacity(self.widths().len());
        let mut c_in = input_channels;
        for &c_out in self.widths() {
            layers.push((c_in, c_out));
            c_in = c_out;
        }
        AutoencoderConfig::new(layers)
    }

    /// Checkpoint path stem; the recorder adds its own extension.
    #[must_use]
    pub fn checkpoint_stem(self) -> &'static str {
        match self {
            Self::Arch0 => "arch_0",
            Self::Arch1 => "arch_1",
            Self::Arch2 => "arch_2",
        }
    }

    /// Checkpoint path stem inside `dir`.
    #[must_use]
    pub fn checkpoint_path(self, dir: &Path) -> PathBuf {
        dir.join(self.checkpoint_stem())
    }
}

/// Layer plan for an [`Autoencoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoencoderConfig {
    /// Encoder `(channel_in, channel_out)` pairs; the decoder mirrors them.
    pub layers: Vec<(usize, usize)>,
    /// Square kernel edge.
    pub kernel_size: usize,
    /// Encoder stride.
    pub stride: usize,
}

impl AutoencoderConfig {
    /// Plan with the published kernel size and stride.
    #[must_use]
    pub fn new(layers: Vec<(usize, usize)>) -> Self {
        Self {
            layers,
            kernel_size: KERNEL_SIZE,
            stride: STRIDE,
        }
    }

    /// Spatial size after encoding and decoding an `input`-sized edge.
    ///
    /// Returns `None` if the input is too small for the encoder.
    #[must_use]
    pub fn output_size(&self, input: usize) -> Option<usize> {
        let k = self.kernel_size;
        let s = self.stride;
        if s == 0 {
            return None;
        }
        let mut size = input;
        for _ in &self.layers {
            size = size.checked_sub(k)? / s + 1;
        }
        for _ in &self.layers {
            size = (size - 1) * s + k;
        }
        Some(size)
    }

    /// Smallest edge the encoder can reduce to a single pixel.
    #[must_use]
    pub fn min_input_size(&self) -> usize {
        self.layers
            .iter()
            .fold(1, |size, _| (size - 1) * self.stride + self.kernel_size)
    }

    /// Build a freshly initialised model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Autoencoder<B> {
        let kernel = [self.kernel_size, self.kernel_size];
        let stride = [self.stride, self.stride];

        let encoder = self
            .layers
            .iter()
            .map(|&(c_in, c_out)| {
                Conv2dConfig::new([c_in, c_out], kernel)
                    .with_stride(stride)
                    .init(device)
            })
            .collect();
        let decoder = self
            .layers
            .iter()
            .rev()
            .map(|&(c_in, c_out)| {
                ConvTranspose2dConfig::new([c_out, c_in], kernel)
                    .with_stride(stride)
                    .init(device)
            })
            .collect();

        Autoencoder { encoder, decoder }
    }
}

/// Whether [`Autoencoder::load`] found a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Parameters were restored from disk.
    Restored,
    /// No checkpoint existed; parameters are still the random initialisation.
    Fresh,
}

/// Encoder/decoder network.
#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    encoder: Vec<Conv2d<B>>,
    decoder: Vec<ConvTranspose2d<B>>,
}

impl<B: Backend> Autoencoder<B> {
    /// Reconstruct a channel-first batch `[n, c, h, w]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let encoded = self
            .encoder
            .iter()
            .fold(input, |x, conv| relu(conv.forward(x)));
        self.decoder
            .iter()
            .fold(encoded, |x, deconv| relu(deconv.forward(x)))
    }

    /// Number of encoder (and decoder) layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.encoder.len()
    }

    /// Write the parameters to `path`, replacing any existing checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the recorder fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.clone()
            .save_file(path.to_path_buf(), &CheckpointRecorder::new())
            .map_err(|e| Error::Checkpoint(format!("{e:?}")))
    }

    /// Restore parameters from `path` if a checkpoint exists there.
    ///
    /// A missing checkpoint is not an error: the model comes back untouched
    /// with [`Checkpoint::Fresh`] and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if a checkpoint exists but cannot be read
    /// or was written by a model with different layers.
    pub fn load(self, path: &Path, device: &B::Device) -> Result<(Self, Checkpoint)> {
        let file = checkpoint_file::<B>(path);
        if !file.exists() {
            log::warn!("No existing model to initialize from. Creating new one ...");
            return Ok((self, Checkpoint::Fresh));
        }

        let recorder = CheckpointRecorder::new();
        let record = <CheckpointRecorder as Recorder<B>>::load(&recorder, path.to_path_buf(), device)
            .map_err(|e| Error::Checkpoint(format!("{}: {e:?}", file.display())))?;
        self.check_record(&record)
            .map_err(|reason| Error::Checkpoint(format!("{}: {reason}", file.display())))?;
        log::info!("restored parameters from {}", file.display());
        Ok((self.load_record(record), Checkpoint::Restored))
    }

    /// Layer counts and weight shapes must match before `load_record`,
    /// which panics on a length mismatch and accepts any tensor shape.
    fn check_record(&self, record: &AutoencoderRecord<B>) -> std::result::Result<(), String> {
        if record.encoder.len() != self.encoder.len() || record.decoder.len() != self.decoder.len()
        {
            return Err(format!(
                "checkpoint has {}/{} encoder/decoder layers, model has {}/{}",
                record.encoder.len(),
                record.decoder.len(),
                self.encoder.len(),
                self.decoder.len()
            ));
        }

        let current = self
            .encoder
            .iter()
            .map(|conv| conv.weight.val().dims())
            .chain(self.decoder.iter().map(|deconv| deconv.weight.val().dims()));
        let stored = record
            .encoder
            .iter()
            .map(|conv| conv.weight.val().dims())
            .chain(record.decoder.iter().map(|deconv| deconv.weight.val().dims()));
        for (layer, (want, found)) in current.zip(stored).enumerate() {
            if want != found {
                return Err(format!(
                    "layer {layer} weight is {found:?} in checkpoint, model expects {want:?}"
                ));
            }
        }
        Ok(())
    }
}

/// The file the recorder actually reads and writes for a checkpoint stem.
#[must_use]
pub fn checkpoint_file<B: Backend>(path: &Path) -> PathBuf {
    path.with_extension(<CheckpointRecorder as FileRecorder<B>>::file_extension())
}

/// Cast a channel-last `u8` batch to `f32` and permute it to `[n, c, h, w]`.
///
/// Intensities are not rescaled.
pub fn to_channels_first<B: Backend>(batch: &HostBatch, device: &B::Device) -> Tensor<B, 4> {
    let values: Vec<f32> = batch.data.iter().copied().map(f32::from).collect();
    Tensor::<B, 4>::from_data(TensorData::new(values, batch.dims), device).permute([0, 3, 1, 2])
}

/// Inverse of [`to_channels_first`] for one image of a batch.
///
/// Values are clamped to `0..=255` and rounded. Returns `None` if the batch
/// has no image at `index` or does not have three channels.
///
/// # Errors
///
/// Returns [`Error::InvalidPixelBuffer`] if the tensor data cannot be read
/// back as `f32`.
pub fn tensor_to_image<B: Backend>(
    batch: &Tensor<B, 4>,
    index: usize,
) -> Result<Option<image::RgbImage>> {
    let [n, c, h, w] = batch.dims();
    if index >= n || c != 3 {
        return Ok(None);
    }

    let invalid = || Error::InvalidPixelBuffer {
        height: h,
        width: w,
        channels: c,
        len: 0,
    };
    let values = batch
        .clone()
        .slice([index..index + 1, 0..c, 0..h, 0..w])
        .permute([0, 2, 3, 1])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|_| invalid())?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pixels: Vec<u8> = values
        .iter()
        .map(|v| v.clamp(0.0, 255.0).round() as u8)
        .collect();
    let width = u32::try_from(w).map_err(|_| invalid())?;
    let height = u32::try_from(h).map_err(|_| invalid())?;
    Ok(image::RgbImage::from_raw(width, height, pixels))
}
