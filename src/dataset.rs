//! Watermarked/original image pairs and their on-disk form.
//!
//! A dataset is built in one pass from a watermark and a list of images,
//! serialized as a single bincode blob, and read back wholesale by
//! [`DatasetReader`].

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use image::{RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::compositor::{apply_watermark, CompositeOptions};
use crate::error::{Error, Result};
use crate::io::{is_supported_image, save_image};

/// Default location of the serialized training set.
pub const DEFAULT_DATASET_PATH: &str = "data/training/set.bin";

/// File name prefix for exported watermarked images.
pub const WATERMARK_PREFIX: &str = "wm";

/// Channel-last pixel array, the serialized form of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArray {
    /// Rows.
    pub height: usize,
    /// Columns.
    pub width: usize,
    /// Channels per pixel.
    pub channels: usize,
    /// Row-major `height * width * channels` intensities.
    pub data: Vec<u8>,
}

impl ImageArray {
    /// Shape as `[height, width, channels]`.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    /// Convert back into an RGB image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPixelBuffer`] unless the array holds exactly
    /// `height * width * 3` bytes.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let invalid = || Error::InvalidPixelBuffer {
            height: self.height,
            width: self.width,
            channels: self.channels,
            len: self.data.len(),
        };
        if self.channels != 3 {
            return Err(invalid());
        }
        let width = u32::try_from(self.width).map_err(|_| invalid())?;
        let height = u32::try_from(self.height).map_err(|_| invalid())?;
        RgbImage::from_raw(width, height, self.data.clone()).ok_or_else(invalid)
    }
}

impl From<&RgbImage> for ImageArray {
    fn from(img: &RgbImage) -> Self {
        Self {
            height: img.height() as usize,
            width: img.width() as usize,
            channels: 3,
            data: img.as_raw().clone(),
        }
    }
}

/// One training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datapoint {
    /// The clean source image.
    pub original: ImageArray,
    /// The same image with the watermark applied.
    pub watermarked: ImageArray,
}

/// An ordered collection of datapoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Datapoints in build order.
    pub datapoints: Vec<Datapoint>,
}

impl Dataset {
    /// Number of datapoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Whether the dataset holds no datapoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// Serialize the whole dataset to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory cannot be created or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Deserialize a dataset previously written by [`Dataset::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened and
    /// [`Error::Serialization`] if the blob is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Watermark every image and pair it with its clean source.
///
/// # Errors
///
/// Fails if an image is too small for the watermark at `opts.ratio`.
pub fn build_dataset(
    watermark: &RgbaImage,
    images: &[RgbImage],
    opts: &CompositeOptions,
) -> Result<Dataset> {
    let mut datapoints = Vec::with_capacity(images.len());
    for image in images {
        let mut marked = image.clone();
        apply_watermark(watermark, &mut marked, opts)?;
        datapoints.push(Datapoint {
            original: ImageArray::from(image),
            watermarked: ImageArray::from(&marked),
        });
    }
    log::info!("built dataset of {} datapoints", datapoints.len());
    Ok(Dataset { datapoints })
}

/// Load every supported image in `dir` as RGB, sorted by file name.
///
/// # Errors
///
/// Fails if the directory cannot be read or an image cannot be decoded.
pub fn load_images(dir: &Path) -> Result<Vec<RgbImage>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_supported_image(p))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            log::debug!("loading {}", path.display());
            Ok(image::open(path)?.to_rgb8())
        })
        .collect()
}

/// Write a datapoint as two image files in `dir`.
///
/// The original goes to `dir/file_name`, the watermarked copy to
/// `dir/wm_file_name`. Returns both paths, watermarked first.
///
/// # Errors
///
/// Fails if the directory cannot be created or either image cannot be saved.
pub fn export_datapoint(
    dir: &Path,
    file_name: &str,
    datapoint: &Datapoint,
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let watermarked_path = dir.join(format!("{WATERMARK_PREFIX}_{file_name}"));
    let original_path = dir.join(file_name);

    save_image(&datapoint.watermarked.to_rgb_image()?, &watermarked_path)?;
    save_image(&datapoint.original.to_rgb_image()?, &original_path)?;

    Ok((watermarked_path, original_path))
}

fn identity(datapoint: Datapoint) -> Datapoint {
    datapoint
}

/// Random-access view over a serialized dataset.
///
/// An optional transform is applied to every datapoint handed out by
/// [`DatasetReader::get`].
pub struct DatasetReader<F = fn(Datapoint) -> Datapoint> {
    datapoints: Vec<Datapoint>,
    transform: F,
}

impl DatasetReader {
    /// Read the dataset at `path` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] for a missing file and
    /// [`Error::Serialization`] for a malformed blob.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_dataset(Dataset::load(path)?))
    }

    /// Wrap an in-memory dataset.
    #[must_use]
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            datapoints: dataset.datapoints,
            transform: identity,
        }
    }

    /// Read the dataset at `path` and apply `transform` to each returned sample.
    ///
    /// # Errors
    ///
    /// Same as [`DatasetReader::open`].
    pub fn open_with_transform<T, G>(path: &Path, transform: G) -> Result<DatasetReader<G>>
    where
        G: Fn(Datapoint) -> T,
    {
        Ok(Self::open(path)?.with_transform(transform))
    }
}

impl<F> DatasetReader<F> {
    /// Replace the transform.
    #[must_use]
    pub fn with_transform<T, G>(self, transform: G) -> DatasetReader<G>
    where
        G: Fn(Datapoint) -> T,
    {
        DatasetReader {
            datapoints: self.datapoints,
            transform,
        }
    }

    /// Number of datapoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Whether the dataset holds no datapoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// `[height, width, channels]` of the first watermarked image.
    #[must_use]
    pub fn input_shape(&self) -> Option<[usize; 3]> {
        self.datapoints.first().map(|dp| dp.watermarked.shape())
    }

    /// Fetch the sample at `index`, passed through the transform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] when `index >= len()`.
    pub fn get<T>(&self, index: usize) -> Result<T>
    where
        F: Fn(Datapoint) -> T,
    {
        let datapoint = self
            .datapoints
            .get(index)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.datapoints.len(),
            })?
            .clone();
        Ok((self.transform)(datapoint))
    }
}
