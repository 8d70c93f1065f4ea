//! Device
//!
//! Histogram construction is sharded across devices. Every device owns a
//! contiguous range of training rows and its own worker pool, computes
//! partial histograms for its rows, and the dispatcher sums the partial
//! results in ascending device order.
use crate::errors::TgbmError;
use crate::histogram::{build_histogram, HistogramSource, NodeHistogram};
use log::debug;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

/// An execution context able to build partial histograms.
pub trait Device: Send + Sync {
    fn id(&self) -> usize;

    /// Histograms restricted to the rows of `shard`, one per task.
    ///
    /// * `source` - Training rows, bins, gradients and layout.
    /// * `shard` - Rows owned by this device.
    /// * `tasks` - Ascending row indices of every node to build.
    fn build_histograms(
        &self,
        source: &HistogramSource,
        shard: Range<usize>,
        tasks: &[&[usize]],
    ) -> Result<Vec<NodeHistogram>, TgbmError>;
}

/// A device backed by a dedicated rayon pool.
pub struct CpuDevice {
    id: usize,
    pool: ThreadPool,
}

impl CpuDevice {
    pub fn new(id: usize, num_threads: usize) -> Result<Self, TgbmError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("tgbm-device-{}-{}", id, i))
            .build()
            .map_err(|e| TgbmError::DeviceError(id, e.to_string()))?;
        Ok(CpuDevice { id, pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Device for CpuDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn build_histograms(
        &self,
        source: &HistogramSource,
        shard: Range<usize>,
        tasks: &[&[usize]],
    ) -> Result<Vec<NodeHistogram>, TgbmError> {
        self.pool.install(|| {
            tasks
                .iter()
                .map(|rows| {
                    let lo = rows.partition_point(|r| *r < shard.start);
                    let hi = rows.partition_point(|r| *r < shard.end);
                    let hist = build_histogram(source, &rows[lo..hi]);
                    if hist.is_finite() {
                        Ok(hist)
                    } else {
                        Err(TgbmError::DeviceError(
                            self.id,
                            "non-finite gradient statistics in histogram".to_string(),
                        ))
                    }
                })
                .collect()
        })
    }
}

/// Contiguous row ranges, one per device, covering `0..n_rows`.
pub fn shard_bounds(n_rows: usize, n_devices: usize) -> Vec<Range<usize>> {
    (0..n_devices)
        .map(|d| (d * n_rows / n_devices)..((d + 1) * n_rows / n_devices))
        .collect()
}

pub struct DeviceDispatcher {
    devices: Vec<Box<dyn Device>>,
}

impl DeviceDispatcher {
    /// Create `n_device` CPU devices sharing `num_threads` threads, each
    /// device gets at least one.
    pub fn new(n_device: usize, num_threads: usize) -> Result<Self, TgbmError> {
        if n_device == 0 {
            return Err(TgbmError::InvalidParameter(
                "n_device".to_string(),
                "at least 1".to_string(),
                n_device.to_string(),
            ));
        }
        let per_device = usize::max(1, num_threads / n_device);
        let devices = (0..n_device)
            .map(|id| CpuDevice::new(id, per_device).map(|d| Box::new(d) as Box<dyn Device>))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Created {} devices with {} threads each.", n_device, per_device);
        Ok(DeviceDispatcher { devices })
    }

    /// Dispatch over caller provided devices.
    pub fn from_devices(devices: Vec<Box<dyn Device>>) -> Self {
        DeviceDispatcher { devices }
    }

    pub fn n_devices(&self) -> usize {
        self.devices.len()
    }

    /// Build complete histograms, missing bins included, for every task.
    ///
    /// * `source` - Training rows, bins, gradients and layout.
    /// * `n_rows` - Number of rows in the training matrix.
    /// * `tasks` - Ascending row indices of every node to build.
    pub fn build_histograms(
        &self,
        source: &HistogramSource,
        n_rows: usize,
        tasks: &[&[usize]],
    ) -> Result<Vec<NodeHistogram>, TgbmError> {
        let bounds = shard_bounds(n_rows, self.devices.len());
        let partials: Vec<Result<Vec<NodeHistogram>, TgbmError>> = if self.devices.len() == 1 {
            vec![self.devices[0].build_histograms(source, 0..n_rows, tasks)]
        } else {
            self.devices
                .par_iter()
                .zip(bounds)
                .map(|(device, shard)| {
                    panic::catch_unwind(AssertUnwindSafe(|| device.build_histograms(source, shard, tasks)))
                        .unwrap_or_else(|_| Err(TgbmError::DeviceError(device.id(), "device worker panicked".to_string())))
                })
                .collect()
        };

        let mut partials = partials.into_iter();
        let mut reduced = match partials.next() {
            Some(first) => first?,
            None => return Err(TgbmError::DeviceError(0, "no devices available".to_string())),
        };
        for partial in partials {
            let partial = partial?;
            reduced.iter_mut().zip(partial.iter()).for_each(|(a, b)| a.merge(b));
        }
        for hist in reduced.iter_mut() {
            hist.finalize_missing(source.layout);
        }
        Ok(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::bin_sparse;
    use crate::config::TreeMethod;
    use crate::data::SparseMatrix;
    use crate::histogram::HistogramLayout;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct FailingDevice {}

    impl Device for FailingDevice {
        fn id(&self) -> usize {
            1
        }
        fn build_histograms(
            &self,
            _source: &HistogramSource,
            _shard: Range<usize>,
            _tasks: &[&[usize]],
        ) -> Result<Vec<NodeHistogram>, TgbmError> {
            Err(TgbmError::DeviceError(1, "out of memory".to_string()))
        }
    }

    struct PanickingDevice {}

    impl Device for PanickingDevice {
        fn id(&self) -> usize {
            2
        }
        fn build_histograms(
            &self,
            _source: &HistogramSource,
            _shard: Range<usize>,
            _tasks: &[&[usize]],
        ) -> Result<Vec<NodeHistogram>, TgbmError> {
            panic!("device lost")
        }
    }

    fn random_matrix(n_rows: usize, n_cols: u32, seed: u64) -> SparseMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        for _ in 0..n_rows {
            let mut row = Vec::new();
            for j in 0..n_cols {
                if rng.gen::<f64>() < 0.5 {
                    row.push((j, f64::from(rng.gen_range(0..20))));
                }
            }
            rows.push(row);
        }
        SparseMatrix::from_rows(&rows, n_cols as usize).unwrap()
    }

    #[test]
    fn test_shard_bounds() {
        assert_eq!(shard_bounds(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(shard_bounds(2, 4), vec![0..0, 0..1, 1..1, 1..2]);
    }

    #[test]
    fn test_device_count_does_not_change_histograms() {
        let matrix = random_matrix(3000, 5, 11);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let binned = bin_sparse(&matrix, 8, TreeMethod::Hist, &pool).unwrap();
        let layout = HistogramLayout::from_cuts(&binned.cuts);
        // Integral gradients keep every partial sum exact.
        let grad: Vec<f32> = (0..3000).map(|i| (i % 7) as f32 - 3.0).collect();
        let hess = vec![1.0; 3000];
        let source = HistogramSource {
            matrix: &matrix,
            bins: &binned.bins,
            grad: &grad,
            hess: &hess,
            layout: &layout,
        };
        let all: Vec<usize> = (0..3000).collect();
        let evens: Vec<usize> = (0..3000).filter(|i| i % 2 == 0).collect();
        let tasks: Vec<&[usize]> = vec![&all, &evens];

        let one = DeviceDispatcher::new(1, 2).unwrap();
        let three = DeviceDispatcher::new(3, 3).unwrap();
        let h1 = one.build_histograms(&source, 3000, &tasks).unwrap();
        let h3 = three.build_histograms(&source, 3000, &tasks).unwrap();
        assert_eq!(h1, h3);
        assert_eq!(h1[0].total.counts, 3000);
        assert_eq!(h1[1].total.counts, 1500);
    }

    #[test]
    fn test_device_failure_propagates() {
        let matrix = random_matrix(10, 2, 3);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let binned = bin_sparse(&matrix, 8, TreeMethod::Hist, &pool).unwrap();
        let layout = HistogramLayout::from_cuts(&binned.cuts);
        let grad = vec![0.0; 10];
        let hess = vec![1.0; 10];
        let source = HistogramSource {
            matrix: &matrix,
            bins: &binned.bins,
            grad: &grad,
            hess: &hess,
            layout: &layout,
        };
        let dispatcher = DeviceDispatcher::from_devices(vec![
            Box::new(CpuDevice::new(0, 1).unwrap()),
            Box::new(FailingDevice {}),
        ]);
        let all: Vec<usize> = (0..10).collect();
        let res = dispatcher.build_histograms(&source, 10, &[&all]);
        assert!(matches!(res, Err(TgbmError::DeviceError(1, _))));

        let dispatcher = DeviceDispatcher::from_devices(vec![
            Box::new(CpuDevice::new(0, 1).unwrap()),
            Box::new(CpuDevice::new(1, 1).unwrap()),
            Box::new(PanickingDevice {}),
        ]);
        let res = dispatcher.build_histograms(&source, 10, &[&all]);
        assert!(matches!(res, Err(TgbmError::DeviceError(2, _))));
    }

    #[test]
    fn test_non_finite_gradients_fail() {
        let matrix = random_matrix(10, 2, 5);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let binned = bin_sparse(&matrix, 8, TreeMethod::Hist, &pool).unwrap();
        let layout = HistogramLayout::from_cuts(&binned.cuts);
        let mut grad = vec![0.0; 10];
        grad[3] = f32::NAN;
        let hess = vec![1.0; 10];
        let source = HistogramSource {
            matrix: &matrix,
            bins: &binned.bins,
            grad: &grad,
            hess: &hess,
            layout: &layout,
        };
        let dispatcher = DeviceDispatcher::new(2, 2).unwrap();
        let all: Vec<usize> = (0..10).collect();
        let res = dispatcher.build_histograms(&source, 10, &[&all]);
        // Row 3 lives on the first device.
        assert!(matches!(res, Err(TgbmError::DeviceError(0, _))));
    }
}
