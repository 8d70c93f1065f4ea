//! Sampler
//!
//! Row bagging and column subsampling. Every draw takes its own generator,
//! seeded by the caller from the run seed, the round and the tree slot.
use log::warn;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

// A sampler can be used to subset the rows prior to fitting a new tree.
pub trait Sampler {
    /// Sample the data, returning a tuple, where the first item is the samples
    /// chosen for training, and the second are the samples excluded.
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>);
}

/// Bernoulli row sampler, every row is kept with probability `subsample`.
pub struct RandomSampler {
    subsample: f32,
}

impl RandomSampler {
    pub fn new(subsample: f32) -> Self {
        RandomSampler { subsample }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let subsample = self.subsample;
        let mut chosen = Vec::new();
        let mut excluded = Vec::new();
        for i in index {
            if rng.gen::<f32>() < subsample {
                chosen.push(*i);
            } else {
                excluded.push(*i)
            }
        }
        (chosen, excluded)
    }
}

/// Rows a tree of this round trains on. Falls back to every row when the
/// draw comes back empty.
pub fn bag_rows(rng: &mut StdRng, n_rows: usize, subsample: f32) -> Vec<usize> {
    let index: Vec<usize> = (0..n_rows).collect();
    let (chosen, _) = RandomSampler::new(subsample).sample(rng, &index);
    if chosen.is_empty() {
        warn!("Bagging selected no rows, training on all {} rows instead.", n_rows);
        index
    } else {
        chosen
    }
}

/// Ascending subset of `0..n_cols` holding `round(n_cols * rate)` columns,
/// and at least one.
pub fn sample_columns(rng: &mut StdRng, n_cols: usize, rate: f32) -> Vec<usize> {
    if rate >= 1.0 || n_cols <= 1 {
        return (0..n_cols).collect();
    }
    let amount = ((n_cols as f64 * f64::from(rate)).round() as usize).clamp(1, n_cols);
    let mut cols = index::sample(rng, n_cols, amount).into_vec();
    cols.sort_unstable();
    cols
}
