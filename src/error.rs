//! Error types for the dewatermarker crate.

/// Errors that can occur while building datasets or training the autoencoder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target image is too small to hold a watermark at the given ratio.
    #[error("image too small ({width}x{height}) for a watermark at ratio {ratio}")]
    ImageTooSmall {
        /// Target width in pixels.
        width: u32,
        /// Target height in pixels.
        height: u32,
        /// Requested resize ratio.
        ratio: u32,
    },

    /// A resize ratio of zero was requested.
    #[error("watermark resize ratio must be at least 1")]
    InvalidRatio,

    /// A dataset index past the end of the dataset.
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of datapoints in the dataset.
        len: usize,
    },

    /// Images inside one batch do not share dimensions.
    #[error("shape mismatch: expected {expected:?} (h, w, c), found {found:?}")]
    ShapeMismatch {
        /// Shape of the first image in the batch.
        expected: [usize; 3],
        /// Shape of the offending image.
        found: [usize; 3],
    },

    /// The dataset holds no datapoints.
    #[error("dataset is empty")]
    EmptyDataset,

    /// The pixel buffer does not match the declared dimensions.
    #[error("pixel buffer of {len} bytes does not match {height}x{width}x{channels}")]
    InvalidPixelBuffer {
        /// Declared height.
        height: usize,
        /// Declared width.
        width: usize,
        /// Declared channel count.
        channels: usize,
        /// Actual buffer length.
        len: usize,
    },

    /// Loading or saving model parameters failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The data-loading worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serialized dataset could not be encoded or decoded.
    #[error("dataset serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let too_small = Error::ImageTooSmall {
            width: 1,
            height: 20,
            ratio: 2,
        };
        let msg = too_small.to_string();
        assert!(msg.contains("1x20"));
        assert!(msg.contains("ratio 2"));

        let oob = Error::IndexOutOfRange { index: 3, len: 3 };
        assert!(oob.to_string().contains("index 3"));
    }
}
