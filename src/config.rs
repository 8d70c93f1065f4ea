//! Configuration
//!
//! Training parameters of the engine, together with their defaults,
//! builder style setters and validation.
use crate::constants::MAX_BIN_LIMIT;
use crate::errors::TgbmError;
use crate::objective::Objective;
use crate::utils::{items_to_strings, validate_float_parameter, validate_positive_float_parameter, validate_usize_parameter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// How cut points are chosen for every feature.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TreeMethod {
    /// Same as `Hist`.
    #[serde(rename = "auto")]
    Auto,
    /// Quantile sketch with at most `max_num_bin` bins per feature.
    #[serde(rename = "hist")]
    Hist,
    /// Every distinct value is a candidate threshold.
    #[serde(rename = "exact")]
    Exact,
}

impl FromStr for TreeMethod {
    type Err = TgbmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TreeMethod::Auto),
            "hist" => Ok(TreeMethod::Hist),
            "exact" => Ok(TreeMethod::Exact),
            _ => Err(TgbmError::ParseString(
                s.to_string(),
                "TreeMethod".to_string(),
                items_to_strings(vec!["auto", "hist", "exact"]),
            )),
        }
    }
}

/// When the column subsample is drawn.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSampleMethod {
    ByTree,
    ByNode,
}

/// Parameters for training an ensemble.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Maximum depth of every tree, the root is at depth 0.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Number of boosting rounds.
    #[serde(default = "default_num_round")]
    pub num_round: usize,
    /// Number of devices the histogram work is sharded across.
    #[serde(default = "default_n_device")]
    pub n_device: usize,
    /// Minimum hessian sum required in each child of a split.
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights.
    #[serde(default = "default_lambda", alias = "lambda_tgbm")]
    pub lambda: f64,
    /// Minimum gain required to split a node.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Maximum number of value bins per feature.
    #[serde(default = "default_max_num_bin")]
    pub max_num_bin: u16,
    /// Log the training metric every `verbose` rounds, 0 disables logging.
    #[serde(default)]
    pub verbose: usize,
    /// Fraction of columns considered when splitting.
    #[serde(default = "default_rate")]
    pub column_sampling_rate: f32,
    #[serde(default = "default_column_sampling_method")]
    pub column_sampling_method: ColumnSampleMethod,
    /// Subsample rows every round.
    #[serde(default)]
    pub bagging: bool,
    /// Fraction of rows kept every round when `bagging` is set.
    #[serde(default = "default_subsample")]
    pub subsample: f32,
    /// Trees grown per class and round from the same gradients.
    #[serde(default = "default_n_parallel_trees")]
    pub n_parallel_trees: usize,
    /// Shrinkage applied to every round.
    #[serde(default = "default_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_objective")]
    pub objective: Objective,
    #[serde(default = "default_num_class")]
    pub num_class: usize,
    /// LibSVM dataset used by `Engine::train_from_path`.
    #[serde(default)]
    pub path: Option<String>,
    /// Where a trained model is written.
    #[serde(default = "default_model_name")]
    pub out_model_name: String,
    /// Where a model is read from for prediction.
    #[serde(default = "default_model_name")]
    pub in_model_name: String,
    #[serde(default = "default_tree_method")]
    pub tree_method: TreeMethod,
    /// Integer value used to seed any randomness used in the algorithm.
    #[serde(default)]
    pub seed: u64,
    /// Number of threads, all available when unset.
    #[serde(default)]
    pub num_threads: Option<usize>,
    /// Initial margin, computed from the labels when unset.
    #[serde(default)]
    pub base_score: Option<f64>,
}

fn default_depth() -> usize {
    6
}
fn default_num_round() -> usize {
    40
}
fn default_n_device() -> usize {
    1
}
fn default_min_child_weight() -> f64 {
    1.0
}
fn default_lambda() -> f64 {
    1.0
}
fn default_gamma() -> f64 {
    1.0
}
fn default_max_num_bin() -> u16 {
    255
}
fn default_rate() -> f32 {
    1.0
}
fn default_column_sampling_method() -> ColumnSampleMethod {
    ColumnSampleMethod::ByTree
}
fn default_subsample() -> f32 {
    0.8
}
fn default_n_parallel_trees() -> usize {
    1
}
fn default_objective() -> Objective {
    Objective::RegLinear
}
fn default_num_class() -> usize {
    1
}
fn default_model_name() -> String {
    "tgbm.model".to_string()
}
fn default_tree_method() -> TreeMethod {
    TreeMethod::Auto
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            depth: default_depth(),
            num_round: default_num_round(),
            n_device: default_n_device(),
            min_child_weight: default_min_child_weight(),
            lambda: default_lambda(),
            gamma: default_gamma(),
            max_num_bin: default_max_num_bin(),
            verbose: 0,
            column_sampling_rate: default_rate(),
            column_sampling_method: default_column_sampling_method(),
            bagging: false,
            subsample: default_subsample(),
            n_parallel_trees: default_n_parallel_trees(),
            learning_rate: default_rate(),
            objective: default_objective(),
            num_class: default_num_class(),
            path: None,
            out_model_name: default_model_name(),
            in_model_name: default_model_name(),
            tree_method: default_tree_method(),
            seed: 0,
            num_threads: None,
            base_score: None,
        }
    }
}

impl TrainingConfig {
    /// Check every parameter range, and that the objective agrees with `num_class`.
    pub fn validate(&self) -> Result<(), TgbmError> {
        validate_usize_parameter(self.num_round, 1, "num_round")?;
        validate_usize_parameter(self.n_device, 1, "n_device")?;
        validate_usize_parameter(self.n_parallel_trees, 1, "n_parallel_trees")?;
        validate_usize_parameter(self.num_class, 1, "num_class")?;
        validate_positive_float_parameter(self.min_child_weight, "min_child_weight")?;
        validate_positive_float_parameter(self.lambda, "lambda")?;
        validate_positive_float_parameter(self.gamma, "gamma")?;
        validate_float_parameter(self.column_sampling_rate, f32::EPSILON, 1.0, "column_sampling_rate")?;
        validate_float_parameter(self.subsample, f32::EPSILON, 1.0, "subsample")?;
        validate_float_parameter(self.learning_rate, f32::EPSILON, f32::MAX, "learning_rate")?;
        if self.max_num_bin < 2 || self.max_num_bin > MAX_BIN_LIMIT {
            return Err(TgbmError::InvalidParameter(
                "max_num_bin".to_string(),
                format!("integer within 2 and {}", MAX_BIN_LIMIT),
                self.max_num_bin.to_string(),
            ));
        }
        if let Some(t) = self.num_threads {
            validate_usize_parameter(t, 1, "num_threads")?;
        }
        if let Some(b) = self.base_score {
            validate_float_parameter(b, f64::MIN, f64::MAX, "base_score")?;
        }
        if self.objective.is_multiclass() && self.num_class < 2 {
            return Err(TgbmError::InvalidParameter(
                "num_class".to_string(),
                format!("at least 2 for {}", self.objective),
                self.num_class.to_string(),
            ));
        }
        if !self.objective.is_multiclass() && self.num_class != 1 {
            return Err(TgbmError::InvalidParameter(
                "num_class".to_string(),
                format!("1 for {}", self.objective),
                self.num_class.to_string(),
            ));
        }
        Ok(())
    }

    /// Number of trees grown every round.
    pub fn trees_per_round(&self) -> usize {
        self.num_class * self.n_parallel_trees
    }

    pub fn set_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn set_num_round(mut self, num_round: usize) -> Self {
        self.num_round = num_round;
        self
    }

    pub fn set_n_device(mut self, n_device: usize) -> Self {
        self.n_device = n_device;
        self
    }

    pub fn set_min_child_weight(mut self, min_child_weight: f64) -> Self {
        self.min_child_weight = min_child_weight;
        self
    }

    pub fn set_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn set_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn set_max_num_bin(mut self, max_num_bin: u16) -> Self {
        self.max_num_bin = max_num_bin;
        self
    }

    pub fn set_verbose(mut self, verbose: usize) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn set_column_sampling_rate(mut self, column_sampling_rate: f32) -> Self {
        self.column_sampling_rate = column_sampling_rate;
        self
    }

    pub fn set_column_sampling_method(mut self, column_sampling_method: ColumnSampleMethod) -> Self {
        self.column_sampling_method = column_sampling_method;
        self
    }

    pub fn set_bagging(mut self, bagging: bool) -> Self {
        self.bagging = bagging;
        self
    }

    pub fn set_subsample(mut self, subsample: f32) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn set_n_parallel_trees(mut self, n_parallel_trees: usize) -> Self {
        self.n_parallel_trees = n_parallel_trees;
        self
    }

    pub fn set_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn set_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Set the objective from its string name, such as `"reg:linear"`.
    pub fn set_objective_str(self, objective: &str) -> Result<Self, TgbmError> {
        Ok(self.set_objective(objective.parse()?))
    }

    pub fn set_num_class(mut self, num_class: usize) -> Self {
        self.num_class = num_class;
        self
    }

    pub fn set_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    pub fn set_out_model_name(mut self, out_model_name: &str) -> Self {
        self.out_model_name = out_model_name.to_string();
        self
    }

    pub fn set_in_model_name(mut self, in_model_name: &str) -> Self {
        self.in_model_name = in_model_name.to_string();
        self
    }

    pub fn set_tree_method(mut self, tree_method: TreeMethod) -> Self {
        self.tree_method = tree_method;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn set_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn set_base_score(mut self, base_score: Option<f64>) -> Self {
        self.base_score = base_score;
        self
    }
}

/// JSON persistence shared by the configuration and trained models.
pub trait ModelIO: Serialize + DeserializeOwned + Sized {
    /// Save as a json object to a file.
    fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), TgbmError> {
        fs::write(path, self.json_dump()?).map_err(|e| TgbmError::IoError(e.to_string()))
    }

    /// Dump as a json object.
    fn json_dump(&self) -> Result<String, TgbmError> {
        serde_json::to_string(self).map_err(|e| TgbmError::IoError(e.to_string()))
    }

    /// Load from a json string. Text that does not parse is reported as corrupt.
    fn from_json(json_str: &str) -> Result<Self, TgbmError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| TgbmError::CorruptModel(e.to_string()))
    }

    /// Load from a path to a json object.
    fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, TgbmError> {
        let json_str = fs::read_to_string(path).map_err(|e| TgbmError::IoError(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl ModelIO for TrainingConfig {
    /// Load from a json string. Unsupported objective or tree method names
    /// are reported as such rather than as a malformed document.
    fn from_json(json_str: &str) -> Result<Self, TgbmError> {
        let value: serde_json::Value =
            serde_json::from_str(json_str).map_err(|e| TgbmError::CorruptModel(e.to_string()))?;
        if let Some(objective) = value.get("objective").and_then(|v| v.as_str()) {
            objective.parse::<Objective>()?;
        }
        if let Some(tree_method) = value.get("tree_method").and_then(|v| v.as_str()) {
            tree_method.parse::<TreeMethod>()?;
        }
        serde_json::from_value(value).map_err(|e| TgbmError::CorruptModel(e.to_string()))
    }
}
