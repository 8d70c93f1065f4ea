//! Booster
//!
//! The boosting loop. Every round computes gradients for all outputs,
//! optionally bags the rows, grows `n_parallel_trees` trees per class from
//! the same gradients and then updates the cached training margins.
use crate::binning::{bin_sparse, BinnedData};
use crate::config::{TrainingConfig, TreeMethod};
use crate::constants::{BAGGING_SLOT, MAX_BIN_LIMIT};
use crate::dataset::SparseDataset;
use crate::device::DeviceDispatcher;
use crate::ensemble::Ensemble;
use crate::errors::TgbmError;
use crate::histogram::HistogramLayout;
use crate::metric::metric_callables;
use crate::objective::{calc_init_callables, gradient_hessian_callables, label_check_callables, loss_callables};
use crate::sampler::bag_rows;
use crate::splitter::MissingImputerSplitter;
use crate::tree::{Tree, TrainingContext, TreeBuilder, TreeParams};
use crate::utils::derive_seed;
use log::{debug, info, log_enabled, Level};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::time::Instant;

/// Trains an [`Ensemble`] on a sparse dataset.
pub struct GBMTrainer<'a> {
    config: &'a TrainingConfig,
    pool: &'a ThreadPool,
    dispatcher: &'a DeviceDispatcher,
}

impl<'a> GBMTrainer<'a> {
    pub fn new(config: &'a TrainingConfig, pool: &'a ThreadPool, dispatcher: &'a DeviceDispatcher) -> Self {
        GBMTrainer {
            config,
            pool,
            dispatcher,
        }
    }

    /// Largest bin a split can use with the configured tree method.
    fn effective_max_num_bin(&self) -> u16 {
        match self.config.tree_method {
            TreeMethod::Exact => MAX_BIN_LIMIT,
            TreeMethod::Auto | TreeMethod::Hist => self.config.max_num_bin,
        }
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.config.depth,
            min_child_weight: self.config.min_child_weight,
            eta: f64::from(self.config.learning_rate) / self.config.n_parallel_trees as f64,
            column_sampling_rate: self.config.column_sampling_rate,
            column_sampling_method: self.config.column_sampling_method,
        }
    }

    /// Run every boosting round. A failing round fails the whole training.
    pub fn train(&self, dataset: &SparseDataset) -> Result<Ensemble, TgbmError> {
        let start = Instant::now();
        let config = self.config;
        config.validate()?;
        let y = &dataset.labels;
        let num_class = config.num_class;
        let n_rows = dataset.n_rows();
        label_check_callables(&config.objective)(y, num_class)?;

        let binned = bin_sparse(&dataset.matrix, config.max_num_bin, config.tree_method, self.pool)?;
        let layout = HistogramLayout::from_cuts(&binned.cuts);
        debug!(
            "Binned {} rows and {} columns into {} histogram bins.",
            n_rows,
            dataset.n_cols(),
            layout.n_bins
        );

        let base_score = match config.base_score {
            Some(b) => vec![b; num_class],
            None => calc_init_callables(&config.objective)(y, num_class),
        };
        let mut ensemble = Ensemble::new(
            config.objective,
            num_class,
            base_score.clone(),
            config.n_parallel_trees,
            self.effective_max_num_bin(),
            binned.cuts.clone(),
        );

        // Class major margins and gradients, class k of row i at k * n_rows + i.
        let mut yhat: Vec<f64> = base_score.iter().flat_map(|b| vec![*b; n_rows]).collect();
        let mut grad = vec![0.0_f32; num_class * n_rows];
        let mut hess = vec![0.0_f32; num_class * n_rows];
        let calc_grad_hess = gradient_hessian_callables(&config.objective);
        let calc_loss = loss_callables(&config.objective);
        let metric_fn = metric_callables(&config.objective.default_metric());

        let ctx = TrainingContext {
            matrix: &dataset.matrix,
            binned: &binned,
            layout: &layout,
            dispatcher: self.dispatcher,
        };
        let mut builder = TreeBuilder::new(
            MissingImputerSplitter::new(config.lambda, config.gamma, config.min_child_weight),
            self.tree_params(),
        );

        for round in 0..config.num_round {
            calc_grad_hess(y, &yhat, num_class, &mut grad, &mut hess);

            let index: Vec<usize> = if config.bagging {
                let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, round, BAGGING_SLOT));
                bag_rows(&mut rng, n_rows, config.subsample)
            } else {
                (0..n_rows).collect()
            };

            let mut trees = Vec::with_capacity(config.trees_per_round());
            for k in 0..num_class {
                let class_grad = &grad[k * n_rows..(k + 1) * n_rows];
                let class_hess = &hess[k * n_rows..(k + 1) * n_rows];
                for p in 0..config.n_parallel_trees {
                    let slot = (k * config.n_parallel_trees + p) as u64;
                    let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, round, slot));
                    let tree = self
                        .pool
                        .install(|| builder.build(&ctx, index.clone(), class_grad, class_hess, &mut rng))?;
                    trees.push(tree);
                }
            }

            // The round is complete, only now do the margins move.
            for (t, tree) in trees.iter().enumerate() {
                let k = t / config.n_parallel_trees;
                self.update_predictions_inplace(&mut yhat[k * n_rows..(k + 1) * n_rows], tree, &ctx);
            }

            if log_enabled!(Level::Debug) {
                let loss = calc_loss(y, &yhat, num_class);
                debug!(
                    "round {}, trees: {}, nodes: {}, max depth: {}, mean loss: {:.6}",
                    round,
                    trees.len(),
                    trees.iter().map(|t| t.nodes.len()).sum::<usize>(),
                    trees.iter().map(|t| t.depth).max().unwrap_or(0),
                    loss.iter().sum::<f64>() / n_rows as f64
                );
            }
            ensemble.trees.push(trees);

            if config.verbose > 0 && (round + 1) % config.verbose == 0 {
                info!(
                    "round {}, train-{}: {:.6}",
                    round,
                    config.objective.default_metric(),
                    metric_fn(y, &yhat, num_class)
                );
            }
        }

        info!(
            "Finished training an ensemble with {} trees in {} rounds in {:.3}s.",
            ensemble.n_trees(),
            config.num_round,
            start.elapsed().as_secs_f32()
        );
        Ok(ensemble)
    }

    fn update_predictions_inplace(&self, yhat: &mut [f64], tree: &Tree, ctx: &TrainingContext) {
        let binned: &BinnedData = ctx.binned;
        self.pool.install(|| {
            yhat.par_iter_mut()
                .enumerate()
                .for_each(|(i, v)| *v += tree.predict_row_binned(ctx.matrix, binned, i));
        });
    }
}
