//! Ensemble
//!
//! A trained model: the boosted trees, the cut points they were grown
//! against and what is needed to turn raw margins into predictions. Models
//! are stored as JSON through [`ModelIO`], and every model read back is
//! checked for structural consistency before it is used.
use crate::config::ModelIO;
use crate::constants::MODEL_FORMAT_VERSION;
use crate::data::{JaggedMatrix, SparseMatrix};
use crate::errors::TgbmError;
use crate::objective::Objective;
use crate::tree::Tree;
use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

type ImportanceFn = fn(&Tree, &mut HashMap<usize, (f64, usize)>);

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImportanceMethod {
    /// The number of times a feature is used to split the data across all trees.
    Weight,
    /// The average split gain across all splits the feature is used in.
    Gain,
    /// The average coverage across all splits the feature is used in.
    Cover,
    /// The total gain across all splits the feature is used in.
    TotalGain,
    /// The total coverage across all splits the feature is used in.
    TotalCover,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Ensemble {
    pub format_version: u32,
    pub objective: Objective,
    pub num_class: usize,
    /// Initial margin of every class.
    pub base_score: Vec<f64>,
    pub n_parallel_trees: usize,
    pub n_features: usize,
    /// Largest bin any split may reference.
    pub max_num_bin: u16,
    /// Cut points of every feature, the last cut is always `f64::MAX`.
    pub cuts: JaggedMatrix<f64>,
    /// One entry per round. Trees of a round are class major,
    /// tree `t` adds to class `t / n_parallel_trees`.
    pub trees: Vec<Vec<Tree>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Ensemble {
    pub fn new(
        objective: Objective,
        num_class: usize,
        base_score: Vec<f64>,
        n_parallel_trees: usize,
        max_num_bin: u16,
        cuts: JaggedMatrix<f64>,
    ) -> Self {
        Ensemble {
            format_version: MODEL_FORMAT_VERSION,
            objective,
            num_class,
            base_score,
            n_parallel_trees,
            n_features: cuts.cols,
            max_num_bin,
            cuts,
            trees: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn trees_per_round(&self) -> usize {
        self.num_class * self.n_parallel_trees
    }

    pub fn n_trees(&self) -> usize {
        self.trees.iter().map(|r| r.len()).sum()
    }

    /// Check every structural invariant of the model.
    pub fn validate(&self) -> Result<(), TgbmError> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(TgbmError::CorruptModel(format!(
                "unsupported format version {}, expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.num_class == 0 || self.n_parallel_trees == 0 {
            return Err(TgbmError::CorruptModel(
                "num_class and n_parallel_trees must be positive".to_string(),
            ));
        }
        if self.objective.is_multiclass() != (self.num_class > 1) {
            return Err(TgbmError::CorruptModel(format!(
                "objective {} cannot have {} classes",
                self.objective, self.num_class
            )));
        }
        if self.base_score.len() != self.num_class || self.base_score.iter().any(|b| !b.is_finite()) {
            return Err(TgbmError::CorruptModel(format!(
                "expected {} finite base scores, found {:?}",
                self.num_class, self.base_score
            )));
        }
        if self.cuts.cols != self.n_features || !self.cuts.is_consistent() {
            return Err(TgbmError::CorruptModel(format!(
                "cut points do not describe {} features",
                self.n_features
            )));
        }
        for j in 0..self.cuts.cols {
            let col = self.cuts.get_col(j);
            let sorted = col.windows(2).all(|w| w[0] < w[1]);
            if !sorted || col.iter().any(|c| !c.is_finite()) || col.last() != Some(&f64::MAX) {
                return Err(TgbmError::CorruptModel(format!("cut points of feature {} are malformed", j)));
            }
        }
        if self.trees.is_empty() {
            return Err(TgbmError::CorruptModel("model holds no trees".to_string()));
        }
        for (round, trees) in self.trees.iter().enumerate() {
            if trees.len() != self.trees_per_round() {
                return Err(TgbmError::CorruptModel(format!(
                    "round {} holds {} trees, expected {}",
                    round,
                    trees.len(),
                    self.trees_per_round()
                )));
            }
            for tree in trees {
                tree.validate(self.n_features, &self.cuts, self.max_num_bin)
                    .map_err(|e| TgbmError::CorruptModel(format!("round {}: {}", round, e)))?;
            }
        }
        Ok(())
    }

    /// Raw margins of a single sparse row, one per class.
    pub fn predict_row(&self, indices: &[u32], values: &[f64]) -> Vec<f64> {
        let mut margins = self.base_score.clone();
        for trees in &self.trees {
            for (t, tree) in trees.iter().enumerate() {
                margins[t / self.n_parallel_trees] += tree.predict_row(indices, values);
            }
        }
        margins
    }

    /// Raw margins, row major with `num_class` values per row.
    pub fn predict_raw(&self, matrix: &SparseMatrix) -> Vec<f64> {
        (0..matrix.rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                let (indices, values) = matrix.row(i);
                self.predict_row(indices, values)
            })
            .collect()
    }

    /// Predictions after the objective's transform: values, probabilities
    /// or class ids. Multi-class probabilities are row major.
    pub fn predict(&self, matrix: &SparseMatrix) -> Vec<f64> {
        self.objective.transform(&self.predict_raw(matrix), self.num_class)
    }

    /// Number of values [`Ensemble::predict`] returns per row.
    pub fn output_width(&self) -> usize {
        self.objective.output_width(self.num_class)
    }

    /// Calculate feature importance measure for the features
    /// in the model.
    /// - `method`: variable importance method to use.
    /// - `normalize`: whether to normalize the importance values with the sum.
    pub fn calculate_feature_importance(&self, method: ImportanceMethod, normalize: bool) -> HashMap<usize, f64> {
        let (average, importance_fn): (bool, ImportanceFn) = match method {
            ImportanceMethod::Weight => (false, Tree::calculate_importance_weight),
            ImportanceMethod::Gain => (true, Tree::calculate_importance_gain),
            ImportanceMethod::TotalGain => (false, Tree::calculate_importance_gain),
            ImportanceMethod::Cover => (true, Tree::calculate_importance_cover),
            ImportanceMethod::TotalCover => (false, Tree::calculate_importance_cover),
        };
        let mut stats = HashMap::new();
        for tree in self.trees.iter().flatten() {
            importance_fn(tree, &mut stats)
        }

        let importance = stats
            .iter()
            .map(|(k, (v, c))| if average { (*k, v / (*c as f64)) } else { (*k, *v) })
            .collect::<HashMap<usize, f64>>();

        if normalize {
            // Sum in a fixed order, map iteration order is arbitrary.
            let mut values: Vec<f64> = importance.values().copied().collect();
            values.sort_by(|a, b| a.total_cmp(b));
            let total: f64 = values.iter().sum();
            importance.iter().map(|(k, v)| (*k, v / total)).collect()
        } else {
            importance
        }
    }

    /// Human readable dump of every tree.
    pub fn dump_string(&self) -> String {
        let mut r = String::new();
        for (round, trees) in self.trees.iter().enumerate() {
            for (t, tree) in trees.iter().enumerate() {
                r += format!(
                    "booster[{}] round={} class={}:\n{}",
                    round * self.trees_per_round() + t,
                    round,
                    t / self.n_parallel_trees,
                    tree
                )
                .as_str();
            }
        }
        r
    }

    /// Write [`Ensemble::dump_string`] to a file.
    pub fn dump_model<P: AsRef<Path>>(&self, path: P) -> Result<(), TgbmError> {
        fs::write(path, self.dump_string()).map_err(|e| TgbmError::IoError(e.to_string()))
    }

    /// Insert a key-value pair into the model's metadata.
    pub fn insert_metadata(&mut self, key: String, value: String) {
        self.metadata.insert(key, value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }
}

impl ModelIO for Ensemble {
    /// Parse a model and check its structure.
    fn from_json(json_str: &str) -> Result<Self, TgbmError> {
        let model = serde_json::from_str::<Ensemble>(json_str).map_err(|e| TgbmError::CorruptModel(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SplittableNode;
    use crate::splitter::{NodeInfo, SplitInfo};
    use approx::assert_relative_eq;

    // One split on feature 0 at 2.0, leaves -1 and 1.
    fn stump(left: f64, right: f64) -> Tree {
        let mut root = SplittableNode::root(0.0, 4.0, 4, 1.0).as_node(1.0);
        let info = NodeInfo {
            grad: 0.0,
            hess: 2.0,
            counts: 2,
            weight: 0.0,
        };
        root.make_parent_node(
            &SplitInfo {
                split_gain: 3.0,
                split_feature: 0,
                split_bin: 1,
                split_value: 2.0,
                default_right: true,
                left_node: info,
                right_node: info,
            },
            1,
            2,
        );
        let mut l = SplittableNode::root(0.0, 2.0, 2, 1.0).as_node(1.0);
        l.num = 1;
        l.depth = 1;
        l.weight_value = left;
        let mut r = l.clone();
        r.num = 2;
        r.weight_value = right;
        Tree {
            nodes: vec![root, l, r],
            depth: 1,
            n_leaves: 2,
        }
    }

    fn model() -> Ensemble {
        let cuts = JaggedMatrix::from_vecs(&[vec![1.0, 2.0, 3.0, f64::MAX], vec![f64::MAX]]);
        let mut m = Ensemble::new(Objective::RegLinear, 1, vec![0.5], 1, 255, cuts);
        m.trees.push(vec![stump(-1.0, 1.0)]);
        m.trees.push(vec![stump(-0.25, 0.125)]);
        m
    }

    fn rows() -> SparseMatrix {
        SparseMatrix::from_rows(
            &[vec![(0, 1.0)], vec![(0, 2.5), (1, 7.0)], vec![(1, 3.0)], vec![(0, f64::NAN)], vec![(4, 1.0)]],
            5,
        )
        .unwrap()
    }

    #[test]
    fn test_predict() {
        let m = model();
        m.validate().unwrap();
        let p = m.predict(&rows());
        assert_relative_eq!(p[0], 0.5 - 1.0 - 0.25);
        assert_relative_eq!(p[1], 0.5 + 1.0 + 0.125);
        // Missing goes right, extra columns are ignored.
        assert_relative_eq!(p[2], 0.5 + 1.0 + 0.125);
        assert_relative_eq!(p[3], p[2]);
        assert_relative_eq!(p[4], p[2]);
        assert_eq!(p, m.predict(&rows()));
    }

    #[test]
    fn test_round_trip_is_exact() {
        let mut m = model();
        m.base_score = vec![0.1 + 0.2];
        m.trees[0][0].nodes[1].weight_value = 1.0 / 3.0;
        m.insert_metadata("origin".to_string(), "unit".to_string());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        m.save_model(&path).unwrap();
        let loaded = Ensemble::load_model(&path).unwrap();
        assert_eq!(loaded, m);
        assert_eq!(loaded.get_metadata("origin"), Some("unit".to_string()));
        let (a, b) = (m.predict(&rows()), loaded.predict(&rows()));
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_corrupt_models_are_rejected() {
        assert!(matches!(
            Ensemble::from_json("{\"trees\": 3"),
            Err(TgbmError::CorruptModel(_))
        ));

        let mut m = model();
        m.trees[1][0].nodes[0].right_child = 9;
        let json = m.json_dump().unwrap();
        assert!(matches!(Ensemble::from_json(&json), Err(TgbmError::CorruptModel(_))));

        let mut m = model();
        m.trees[0][0].nodes[0].split_bin = 300;
        m.max_num_bin = 4;
        assert!(Ensemble::from_json(&m.json_dump().unwrap()).is_err());

        let mut m = model();
        m.base_score = vec![0.0, 0.0];
        assert!(Ensemble::from_json(&m.json_dump().unwrap()).is_err());

        let mut m = model();
        m.trees.clear();
        assert!(Ensemble::from_json(&m.json_dump().unwrap()).is_err());

        let missing = tempfile::tempdir().unwrap().path().join("absent.json");
        assert!(matches!(Ensemble::load_model(missing), Err(TgbmError::IoError(_))));
    }

    #[test]
    fn test_feature_importance_and_dump() {
        let m = model();
        let w = m.calculate_feature_importance(ImportanceMethod::Weight, false);
        assert_eq!(w.get(&0), Some(&2.0));
        let g = m.calculate_feature_importance(ImportanceMethod::Gain, true);
        assert_relative_eq!(g[&0], 1.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        m.dump_model(&path).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("booster[0] round=0 class=0:\n0:[f0 < 2]"));
        assert_eq!(text.matches("booster[").count(), 2);
    }
}
