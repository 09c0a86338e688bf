//! Mini-batch iteration over a [`DatasetReader`].
//!
//! Batches are index chunks over the dataset, optionally shuffled each epoch.
//! With the `parallel` feature the samples of one batch are fetched on a
//! dedicated rayon pool of `num_workers` threads.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::dataset::{Datapoint, DatasetReader, ImageArray};
use crate::error::{Error, Result};

/// A stack of equally sized channel-last images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBatch {
    /// `[batch, height, width, channels]`.
    pub dims: [usize; 4],
    /// Concatenated pixel data, row-major within each image.
    pub data: Vec<u8>,
}

/// Stack images into one batch.
///
/// # Errors
///
/// Returns [`Error::EmptyDataset`] for no images and
/// [`Error::ShapeMismatch`] if any image differs from the first.
pub fn collate<'a, I>(images: I) -> Result<HostBatch>
where
    I: IntoIterator<Item = &'a ImageArray>,
{
    let mut images = images.into_iter();
    let first = images.next().ok_or(Error::EmptyDataset)?;
    let expected = first.shape();

    let mut data = first.data.clone();
    let mut count = 1;
    for image in images {
        if image.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                found: image.shape(),
            });
        }
        data.extend_from_slice(&image.data);
        count += 1;
    }

    Ok(HostBatch {
        dims: [count, expected[0], expected[1], expected[2]],
        data,
    })
}

/// The two halves of a training batch.
#[derive(Debug, Clone)]
pub struct PairBatch {
    /// Network input.
    pub watermarked: HostBatch,
    /// Reconstruction target.
    pub original: HostBatch,
}

impl PairBatch {
    /// Collate fetched datapoints.
    ///
    /// # Errors
    ///
    /// See [`collate`].
    pub fn from_datapoints(datapoints: &[Datapoint]) -> Result<Self> {
        Ok(Self {
            watermarked: collate(datapoints.iter().map(|dp| &dp.watermarked))?,
            original: collate(datapoints.iter().map(|dp| &dp.original))?,
        })
    }
}

/// Splits a dataset into mini-batches and fetches them.
pub struct BatchLoader {
    batch_size: usize,
    shuffle: bool,
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl BatchLoader {
    /// Create a loader. `batch_size` is clamped to at least one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPool`] if the worker threads cannot be spawned.
    #[cfg_attr(not(feature = "parallel"), allow(clippy::unnecessary_wraps))]
    pub fn new(batch_size: usize, shuffle: bool, num_workers: usize) -> Result<Self> {
        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("loader-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        #[cfg(not(feature = "parallel"))]
        let _ = num_workers;

        Ok(Self {
            batch_size: batch_size.max(1),
            shuffle,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Index chunks for one epoch over `len` samples.
    ///
    /// Every index appears exactly once; the last chunk may be short.
    pub fn batch_indices<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Fetch the datapoints for one chunk of indices.
    ///
    /// # Errors
    ///
    /// Propagates the first failing [`DatasetReader::get`].
    pub fn fetch<F>(&self, reader: &DatasetReader<F>, indices: &[usize]) -> Result<Vec<Datapoint>>
    where
        F: Fn(Datapoint) -> Datapoint + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.pool
                .install(|| indices.par_iter().map(|&i| reader.get(i)).collect())
        }

        #[cfg(not(feature = "parallel"))]
        {
            indices.iter().map(|&i| reader.get(i)).collect()
        }
    }

    /// Fetch and collate one chunk.
    ///
    /// # Errors
    ///
    /// See [`BatchLoader::fetch`] and [`collate`].
    pub fn load_batch<F>(&self, reader: &DatasetReader<F>, indices: &[usize]) -> Result<PairBatch>
    where
        F: Fn(Datapoint) -> Datapoint + Sync,
    {
        let datapoints = self.fetch(reader, indices)?;
        PairBatch::from_datapoints(&datapoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn array(h: usize, w: usize, fill: u8) -> ImageArray {
        ImageArray {
            height: h,
            width: w,
            channels: 3,
            data: vec![fill; h * w * 3],
        }
    }

    fn reader(n: usize) -> DatasetReader {
        #[allow(clippy::cast_possible_truncation)]
        let datapoints = (0..n)
            .map(|i| Datapoint {
                original: array(2, 3, i as u8),
                watermarked: array(2, 3, 100 + i as u8),
            })
            .collect();
        DatasetReader::from_dataset(Dataset { datapoints })
    }

    #[test]
    fn collate_stacks_in_order() {
        let a = array(2, 2, 1);
        let b = array(2, 2, 2);
        let batch = collate([&a, &b]).unwrap();
        assert_eq!(batch.dims, [2, 2, 2, 3]);
        assert_eq!(&batch.data[..12], &a.data[..]);
        assert_eq!(&batch.data[12..], &b.data[..]);
    }

    #[test]
    fn collate_rejects_mixed_shapes() {
        let a = array(2, 2, 1);
        let b = array(3, 2, 1);
        assert!(matches!(
            collate([&a, &b]),
            Err(Error::ShapeMismatch {
                expected: [2, 2, 3],
                found: [3, 2, 3]
            })
        ));
        assert!(matches!(collate(std::iter::empty()), Err(Error::EmptyDataset)));
    }

    #[test]
    fn indices_cover_every_sample_once() {
        let mut rng = StdRng::seed_from_u64(7);
        for shuffle in [false, true] {
            let loader = BatchLoader::new(4, shuffle, 2).unwrap();
            let batches = loader.batch_indices(10, &mut rng);
            assert_eq!(batches.len(), 3);
            assert_eq!(batches.last().unwrap().len(), 2);

            let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn unshuffled_batches_are_sequential() {
        let loader = BatchLoader::new(3, false, 1).unwrap();
        let batches = loader.batch_indices(5, &mut StdRng::seed_from_u64(0));
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn load_batch_pairs_inputs_with_targets() {
        let reader = reader(5);
        let loader = BatchLoader::new(2, false, 2).unwrap();
        let batch = loader.load_batch(&reader, &[4, 1]).unwrap();

        assert_eq!(batch.watermarked.dims, [2, 2, 3, 3]);
        assert_eq!(batch.original.data[0], 4);
        assert_eq!(batch.original.data[18], 1);
        assert_eq!(batch.watermarked.data[0], 104);

        assert!(matches!(
            loader.load_batch(&reader, &[0, 5]),
            Err(Error::IndexOutOfRange { index: 5, len: 5 })
        ));
    }
}
