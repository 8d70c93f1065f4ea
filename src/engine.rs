//! Engine
//!
//! Handle owning the worker pool and the devices. It is created from a
//! [`TrainingConfig`], used to train and predict, and released when done.
use crate::booster::GBMTrainer;
use crate::config::{ModelIO, TrainingConfig};
use crate::data::Features;
use crate::dataset::SparseDataset;
use crate::device::DeviceDispatcher;
use crate::ensemble::Ensemble;
use crate::errors::TgbmError;
use log::{debug, info, warn};
use rayon::ThreadPool;

/// Outcome of [`Engine::fit`], with the flag values of the training call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStatus {
    Success = 0,
    Failure = -1,
}

impl TrainStatus {
    pub fn as_flag(self) -> i32 {
        self as i32
    }
}

pub struct Engine {
    config: TrainingConfig,
    pool: ThreadPool,
    dispatcher: DeviceDispatcher,
}

impl Engine {
    /// Validate the configuration and start the worker pool and devices.
    pub fn new(config: TrainingConfig) -> Result<Self, TgbmError> {
        config.validate()?;
        let num_threads = match config.num_threads {
            Some(num_threads) => num_threads,
            None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| TgbmError::DeviceError(0, e.to_string()))?;
        let dispatcher = DeviceDispatcher::new(config.n_device, num_threads)?;
        info!(
            "Created engine for {} with {} threads across {} devices.",
            config.objective, num_threads, config.n_device
        );
        Ok(Engine {
            config,
            pool,
            dispatcher,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train an ensemble on CSR features and one label per row.
    pub fn train(&self, features: Features, labels: &[f32]) -> Result<Ensemble, TgbmError> {
        let dataset = SparseDataset::new(features, labels)?;
        self.train_dataset(&dataset)
    }

    pub fn train_dataset(&self, dataset: &SparseDataset) -> Result<Ensemble, TgbmError> {
        GBMTrainer::new(&self.config, &self.pool, &self.dispatcher).train(dataset)
    }

    /// Train on the LibSVM file named by `path` in the configuration.
    pub fn train_from_path(&self) -> Result<Ensemble, TgbmError> {
        let path = self.config.path.as_ref().ok_or_else(|| {
            TgbmError::InvalidParameter(
                "path".to_string(),
                "path of a LibSVM file".to_string(),
                "None".to_string(),
            )
        })?;
        let dataset = SparseDataset::from_libsvm_file(path)?;
        self.train_dataset(&dataset)
    }

    /// Train and write the model to `out_model_name`.
    pub fn fit(&self, features: Features, labels: &[f32]) -> TrainStatus {
        let res = self
            .train(features, labels)
            .and_then(|model| model.save_model(&self.config.out_model_name));
        match res {
            Ok(()) => {
                info!("Model written to {}.", self.config.out_model_name);
                TrainStatus::Success
            }
            Err(e) => {
                warn!("Training failed: {}", e);
                TrainStatus::Failure
            }
        }
    }

    /// Predict with the model stored at `in_model_name`.
    pub fn predict(&self, features: Features) -> Result<Vec<f64>, TgbmError> {
        let model = Ensemble::load_model(&self.config.in_model_name)?;
        self.predict_with(&model, features)
    }

    /// Predict with the model stored at `in_model_name` into `out`, which
    /// must hold exactly one value per row and output.
    pub fn predict_into(&self, features: Features, out: &mut [f64]) -> Result<(), TgbmError> {
        let model = Ensemble::load_model(&self.config.in_model_name)?;
        let expected = features.rows() * model.output_width();
        if out.len() != expected {
            return Err(TgbmError::ShapeMismatch(format!(
                "output buffer holds {} values, {} required",
                out.len(),
                expected
            )));
        }
        let preds = self.predict_with(&model, features)?;
        out.copy_from_slice(&preds);
        Ok(())
    }

    pub fn predict_with(&self, model: &Ensemble, features: Features) -> Result<Vec<f64>, TgbmError> {
        let matrix = features.as_sparse()?;
        matrix.validate()?;
        let matrix = matrix.sorted()?;
        Ok(self.pool.install(|| model.predict(&matrix)))
    }

    /// Shut down the worker pool and the devices.
    pub fn release(self) {
        debug!("Releasing engine with {} devices.", self.dispatcher.n_devices());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Matrix, SparseMatrix};
    use crate::objective::Objective;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;

    fn config_in(dir: &Path) -> TrainingConfig {
        let model = dir.join("tgbm.model");
        let model = model.to_str().unwrap();
        TrainingConfig::default()
            .set_num_threads(Some(2))
            .set_out_model_name(model)
            .set_in_model_name(model)
    }

    fn four_by_three() -> (SparseMatrix, Vec<f32>) {
        let matrix = SparseMatrix::from_rows(
            &[
                vec![(0, 1.0), (1, 3.0)],
                vec![(2, 5.0), (0, 2.0), (1, 1.0)],
                vec![(0, 8.0), (1, 2.0), (2, 1.0)],
                vec![(0, 9.0), (1, 4.0), (2, 6.0)],
            ],
            3,
        )
        .unwrap();
        (matrix, vec![0.0, 0.0, 10.0, 10.0])
    }

    fn random_data(n: usize, seed: u64) -> (SparseMatrix, Vec<f32>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for _ in 0..n {
            let mut row = Vec::new();
            for j in 0..5u32 {
                if rng.gen::<f64>() < 0.6 {
                    row.push((j, rng.gen::<f64>() * 4.0));
                }
            }
            let x0 = row.iter().find(|(j, _)| *j == 0).map(|(_, v)| *v).unwrap_or(2.0);
            y.push((x0 * x0) as f32 + rng.gen::<f32>());
            rows.push(row);
        }
        (SparseMatrix::from_rows(&rows, 5).unwrap(), y)
    }

    #[test]
    fn test_four_by_three_example() {
        let dir = tempfile::tempdir().unwrap();
        let (matrix, y) = four_by_three();
        let engine = Engine::new(config_in(dir.path()).set_depth(3).set_num_round(2)).unwrap();
        assert_eq!(engine.fit(Features::Sparse(&matrix), &y).as_flag(), 0);

        let model = Ensemble::load_model(&engine.config().out_model_name).unwrap();
        let root = &model.trees[0][0].nodes[0];
        assert!(!root.is_leaf);
        assert_eq!(root.split_feature, 0);

        let preds = engine.predict(Features::Sparse(&matrix)).unwrap();
        assert!(preds[2] > preds[0] && preds[2] > preds[1]);
        assert!(preds[3] > preds[0] && preds[3] > preds[1]);
        engine.release();
    }

    #[test]
    fn test_dense_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path())).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let dense = Matrix::new(&data, 2, 2);
        let res = engine.train(Features::Dense(&dense), &[0.0, 1.0]);
        assert!(matches!(res, Err(TgbmError::UnsupportedInput(_))));
        assert_eq!(engine.fit(Features::Dense(&dense), &[0.0, 1.0]), TrainStatus::Failure);
        assert_eq!(TrainStatus::Failure.as_flag(), -1);
        assert!(!Path::new(&engine.config().out_model_name).exists());
        assert!(matches!(
            engine.predict(Features::Dense(&dense)),
            Err(TgbmError::IoError(_))
        ));
    }

    #[test]
    fn test_rows_without_features_predict_the_base_score() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = SparseMatrix::from_rows(&[vec![], vec![], vec![], vec![]], 3).unwrap();
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let engine = Engine::new(config_in(dir.path()).set_num_round(3)).unwrap();
        let model = engine.train(Features::Sparse(&matrix), &y).unwrap();
        assert!(model.trees.iter().flatten().all(|t| t.nodes.len() == 1));
        let preds = engine.predict_with(&model, Features::Sparse(&matrix)).unwrap();
        for p in preds {
            assert_relative_eq!(p, 2.5);
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (matrix, y) = random_data(600, 3);
        let config = config_in(dir.path())
            .set_num_round(8)
            .set_n_device(2)
            .set_bagging(true)
            .set_column_sampling_rate(0.6)
            .set_seed(5);
        let a = Engine::new(config.clone()).unwrap().train(Features::Sparse(&matrix), &y).unwrap();
        let b = Engine::new(config).unwrap().train(Features::Sparse(&matrix), &y).unwrap();
        assert_eq!(a.json_dump().unwrap(), b.json_dump().unwrap());
    }

    #[test]
    fn test_predictions_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (matrix, y) = random_data(300, 8);
        let engine = Engine::new(config_in(dir.path()).set_num_round(5)).unwrap();
        let model = engine.train(Features::Sparse(&matrix), &y).unwrap();
        let before = engine.predict_with(&model, Features::Sparse(&matrix)).unwrap();
        model.save_model(&engine.config().out_model_name).unwrap();

        let after = engine.predict(Features::Sparse(&matrix)).unwrap();
        let again = engine.predict(Features::Sparse(&matrix)).unwrap();
        assert!(before.iter().zip(&after).all(|(a, b)| a.to_bits() == b.to_bits()));
        assert!(after.iter().zip(&again).all(|(a, b)| a.to_bits() == b.to_bits()));

        let mut out = vec![0.0; 300];
        engine.predict_into(Features::Sparse(&matrix), &mut out).unwrap();
        assert_eq!(out, after);
        let mut short = vec![0.0; 10];
        assert!(matches!(
            engine.predict_into(Features::Sparse(&matrix), &mut short),
            Err(TgbmError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_model_is_shared_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (matrix, y) = random_data(200, 4);
        let engine = Engine::new(config_in(dir.path()).set_num_round(4)).unwrap();
        let model = engine.train(Features::Sparse(&matrix), &y).unwrap();
        let expected = model.predict(&matrix);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| model.predict(&matrix))).collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn test_multi_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..90 {
            let k = i % 3;
            rows.push(vec![(0, k as f64 + rng.gen::<f64>() * 0.5), (1, rng.gen::<f64>())]);
            y.push(k as f32);
        }
        let matrix = SparseMatrix::from_rows(&rows, 2).unwrap();
        let config = config_in(dir.path())
            .set_num_round(10)
            .set_objective(Objective::MultiSoftmax)
            .set_num_class(3);
        let engine = Engine::new(config.clone()).unwrap();
        let model = engine.train(Features::Sparse(&matrix), &y).unwrap();
        assert!(model.trees.iter().all(|r| r.len() == 3));
        let classes = engine.predict_with(&model, Features::Sparse(&matrix)).unwrap();
        assert_eq!(classes.len(), 90);
        let correct = classes.iter().zip(&y).filter(|(p, y)| **p == f64::from(**y)).count();
        assert_eq!(correct, 90);

        let engine = Engine::new(config.set_objective(Objective::MultiSoftprob)).unwrap();
        let model = engine.train(Features::Sparse(&matrix), &y).unwrap();
        let probs = engine.predict_with(&model, Features::Sparse(&matrix)).unwrap();
        assert_eq!(probs.len(), 270);
        for row in probs.chunks(3) {
            assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            TrainingConfig::default().set_objective_str("rank:pairwise"),
            Err(TgbmError::UnknownObjective(..))
        ));
        let bad = TrainingConfig::default().set_objective(Objective::MultiSoftprob);
        assert!(matches!(Engine::new(bad), Err(TgbmError::InvalidParameter(..))));
        let engine = Engine::new(TrainingConfig::default().set_num_threads(Some(1))).unwrap();
        assert!(matches!(engine.train_from_path(), Err(TgbmError::InvalidParameter(..))));
    }

    #[test]
    fn test_unwritable_model_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (matrix, y) = four_by_three();
        let missing_dir = dir.path().join("no").join("such").join("dir").join("m.json");
        let config = config_in(dir.path())
            .set_num_round(1)
            .set_out_model_name(missing_dir.to_str().unwrap());
        let engine = Engine::new(config).unwrap();
        assert_eq!(engine.fit(Features::Sparse(&matrix), &y), TrainStatus::Failure);
    }

    #[test]
    fn test_infinite_features_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<(u32, f64)>> = [f64::NEG_INFINITY, 1.0, 5.0, 9.0, f64::INFINITY]
            .iter()
            .map(|v| vec![(0, *v)])
            .collect();
        let matrix = SparseMatrix::from_rows(&rows, 1).unwrap();
        let y = vec![0.0, 0.0, 10.0, 10.0, 10.0];
        let engine = Engine::new(config_in(dir.path()).set_num_round(2)).unwrap();
        assert_eq!(engine.fit(Features::Sparse(&matrix), &y), TrainStatus::Success);

        let preds = engine.predict(Features::Sparse(&matrix)).unwrap();
        let model = Ensemble::load_model(&engine.config().in_model_name).unwrap();
        assert_eq!(model.trees[0][0].nodes[0].split_value, 5.0);
        assert_eq!(preds[0], preds[1]);
        assert_eq!(preds[4], preds[3]);
        assert!(preds[4] > preds[0]);
    }

    #[test]
    fn test_train_from_libsvm_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.libsvm");
        std::fs::write(&path, "0 1:1 2:3\n0 1:2 2:1 3:5\n10 1:8 2:2 3:1\n10 1:9 2:4 3:6\n").unwrap();
        let config = config_in(dir.path()).set_depth(3).set_num_round(2).set_path(Some(
            path.to_str().unwrap().to_string(),
        ));
        let engine = Engine::new(config).unwrap();
        let model = engine.train_from_path().unwrap();
        assert_eq!(model.n_features, 3);
        assert_eq!(model.trees[0][0].nodes[0].split_feature, 0);
    }
}
