//! Objective
//!
//! Loss functions the booster can optimize. Every objective exposes its
//! gradient and hessian, its initial prediction and the transform applied
//! to raw margins at prediction time.
//!
//! Buffers used during training are class major: the margin of row `i` for
//! class `k` lives at `k * n_rows + i`.
use crate::constants::{HESSIAN_EPS, PROBABILITY_EPS};
use crate::errors::TgbmError;
use crate::metric::Metric;
use crate::utils::{fast_f64_sum, items_to_strings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

type ObjFn = fn(&[f32], &[f64], usize, &mut [f32], &mut [f32]);
type LossFn = fn(&[f32], &[f64], usize) -> Vec<f64>;
type InitFn = fn(&[f32], usize) -> Vec<f64>;
type LabelCheckFn = fn(&[f32], usize) -> Result<(), TgbmError>;

const OBJECTIVE_NAMES: [&str; 5] = [
    "reg:linear",
    "reg:logistic",
    "binary:logistic",
    "multi:softmax",
    "multi:softprob",
];

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum Objective {
    /// Squared error regression.
    #[serde(rename = "reg:linear")]
    RegLinear,
    /// Logistic regression, predictions are probabilities.
    #[serde(rename = "reg:logistic")]
    RegLogistic,
    /// Binary classification with log loss, predictions are probabilities.
    #[serde(rename = "binary:logistic")]
    BinaryLogistic,
    /// Multi-class classification, predictions are class ids.
    #[serde(rename = "multi:softmax")]
    MultiSoftmax,
    /// Multi-class classification, predictions are class probabilities.
    #[serde(rename = "multi:softprob")]
    MultiSoftprob,
}

impl FromStr for Objective {
    type Err = TgbmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reg:linear" => Ok(Objective::RegLinear),
            "reg:logistic" => Ok(Objective::RegLogistic),
            "binary:logistic" => Ok(Objective::BinaryLogistic),
            "multi:softmax" => Ok(Objective::MultiSoftmax),
            "multi:softprob" => Ok(Objective::MultiSoftprob),
            _ => Err(TgbmError::UnknownObjective(
                s.to_string(),
                items_to_strings(OBJECTIVE_NAMES.to_vec()),
            )),
        }
    }
}

impl TryFrom<String> for Objective {
    type Error = TgbmError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Objective::RegLinear => OBJECTIVE_NAMES[0],
            Objective::RegLogistic => OBJECTIVE_NAMES[1],
            Objective::BinaryLogistic => OBJECTIVE_NAMES[2],
            Objective::MultiSoftmax => OBJECTIVE_NAMES[3],
            Objective::MultiSoftprob => OBJECTIVE_NAMES[4],
        };
        write!(f, "{}", name)
    }
}

impl Objective {
    pub fn is_multiclass(&self) -> bool {
        matches!(self, Objective::MultiSoftmax | Objective::MultiSoftprob)
    }

    pub fn default_metric(&self) -> Metric {
        match self {
            Objective::RegLinear => SquaredLoss::default_metric(),
            Objective::RegLogistic | Objective::BinaryLogistic => LogLoss::default_metric(),
            Objective::MultiSoftmax | Objective::MultiSoftprob => SoftmaxLoss::default_metric(),
        }
    }

    /// Transform raw margins into predictions.
    ///
    /// * `raw` - Row major margins, `num_class` values per row.
    /// * `num_class` - Number of outputs per row.
    pub fn transform(&self, raw: &[f64], num_class: usize) -> Vec<f64> {
        match self {
            Objective::RegLinear => raw.to_vec(),
            Objective::RegLogistic | Objective::BinaryLogistic => raw.iter().map(|v| sigmoid(*v)).collect(),
            Objective::MultiSoftprob => raw.chunks(num_class).flat_map(softmax).collect(),
            Objective::MultiSoftmax => raw
                .chunks(num_class)
                .map(|row| {
                    // Lowest class id wins ties.
                    let mut best = 0;
                    for (k, v) in row.iter().enumerate() {
                        if *v > row[best] {
                            best = k;
                        }
                    }
                    best as f64
                })
                .collect(),
        }
    }

    /// Number of values produced per row by [`Objective::transform`].
    pub fn output_width(&self, num_class: usize) -> usize {
        match self {
            Objective::MultiSoftprob => num_class,
            _ => 1,
        }
    }
}

pub fn gradient_hessian_callables(objective: &Objective) -> ObjFn {
    match objective {
        Objective::RegLinear => SquaredLoss::calc_grad_hess,
        Objective::RegLogistic | Objective::BinaryLogistic => LogLoss::calc_grad_hess,
        Objective::MultiSoftmax | Objective::MultiSoftprob => SoftmaxLoss::calc_grad_hess,
    }
}

pub fn loss_callables(objective: &Objective) -> LossFn {
    match objective {
        Objective::RegLinear => SquaredLoss::calc_loss,
        Objective::RegLogistic | Objective::BinaryLogistic => LogLoss::calc_loss,
        Objective::MultiSoftmax | Objective::MultiSoftprob => SoftmaxLoss::calc_loss,
    }
}

pub fn calc_init_callables(objective: &Objective) -> InitFn {
    match objective {
        Objective::RegLinear => SquaredLoss::calc_init,
        Objective::RegLogistic | Objective::BinaryLogistic => LogLoss::calc_init,
        Objective::MultiSoftmax | Objective::MultiSoftprob => SoftmaxLoss::calc_init,
    }
}

pub fn label_check_callables(objective: &Objective) -> LabelCheckFn {
    match objective {
        Objective::RegLinear => SquaredLoss::check_labels,
        Objective::RegLogistic | Objective::BinaryLogistic => LogLoss::check_labels,
        Objective::MultiSoftmax | Objective::MultiSoftprob => SoftmaxLoss::check_labels,
    }
}

pub trait ObjectiveFunction {
    /// Per row loss.
    fn calc_loss(y: &[f32], yhat: &[f64], num_class: usize) -> Vec<f64>;
    /// Fill the class major gradient and hessian buffers.
    fn calc_grad_hess(y: &[f32], yhat: &[f64], num_class: usize, grad: &mut [f32], hess: &mut [f32]);
    /// Initial margin for every class.
    fn calc_init(y: &[f32], num_class: usize) -> Vec<f64>;
    fn check_labels(y: &[f32], num_class: usize) -> Result<(), TgbmError>;
    fn default_metric() -> Metric;
}

#[inline]
pub fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Numerically stable softmax of one row of margins.
pub fn softmax(row: &[f64]) -> Vec<f64> {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

#[derive(Default)]
pub struct SquaredLoss {}

impl ObjectiveFunction for SquaredLoss {
    fn calc_loss(y: &[f32], yhat: &[f64], _num_class: usize) -> Vec<f64> {
        y.iter()
            .zip(yhat)
            .map(|(y_, yhat_)| {
                let d = f64::from(*y_) - *yhat_;
                d * d
            })
            .collect()
    }

    #[inline]
    fn calc_grad_hess(y: &[f32], yhat: &[f64], _num_class: usize, grad: &mut [f32], hess: &mut [f32]) {
        grad.iter_mut()
            .zip(hess.iter_mut())
            .zip(y.iter().zip(yhat))
            .for_each(|((g, h), (y_, yhat_))| {
                *g = (*yhat_ - f64::from(*y_)) as f32;
                *h = 1.0;
            });
    }

    fn calc_init(y: &[f32], _num_class: usize) -> Vec<f64> {
        vec![fast_f64_sum(y) / y.len() as f64]
    }

    fn check_labels(_y: &[f32], _num_class: usize) -> Result<(), TgbmError> {
        Ok(())
    }

    fn default_metric() -> Metric {
        Metric::RootMeanSquaredError
    }
}

#[derive(Default)]
pub struct LogLoss {}

impl ObjectiveFunction for LogLoss {
    fn calc_loss(y: &[f32], yhat: &[f64], _num_class: usize) -> Vec<f64> {
        y.iter()
            .zip(yhat)
            .map(|(y_, yhat_)| {
                let p = sigmoid(*yhat_).clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS);
                let y_ = f64::from(*y_);
                -(y_ * p.ln() + (1.0 - y_) * (1.0 - p).ln())
            })
            .collect()
    }

    #[inline]
    fn calc_grad_hess(y: &[f32], yhat: &[f64], _num_class: usize, grad: &mut [f32], hess: &mut [f32]) {
        grad.iter_mut()
            .zip(hess.iter_mut())
            .zip(y.iter().zip(yhat))
            .for_each(|((g, h), (y_, yhat_))| {
                let p = sigmoid(*yhat_);
                *g = (p - f64::from(*y_)) as f32;
                *h = (p * (1.0 - p)).max(HESSIAN_EPS) as f32;
            });
    }

    fn calc_init(y: &[f32], _num_class: usize) -> Vec<f64> {
        let mean = (fast_f64_sum(y) / y.len() as f64).clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS);
        vec![f64::ln(mean / (1.0 - mean))]
    }

    fn check_labels(y: &[f32], _num_class: usize) -> Result<(), TgbmError> {
        match y.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            Some(v) => Err(TgbmError::InvalidParameter(
                "labels".to_string(),
                "values within 0 and 1 for a logistic objective".to_string(),
                v.to_string(),
            )),
            None => Ok(()),
        }
    }

    fn default_metric() -> Metric {
        Metric::LogLoss
    }
}

#[derive(Default)]
pub struct SoftmaxLoss {}

impl SoftmaxLoss {
    fn row_probabilities(yhat: &[f64], n_rows: usize, num_class: usize, i: usize) -> Vec<f64> {
        let row: Vec<f64> = (0..num_class).map(|k| yhat[k * n_rows + i]).collect();
        softmax(&row)
    }
}

impl ObjectiveFunction for SoftmaxLoss {
    fn calc_loss(y: &[f32], yhat: &[f64], num_class: usize) -> Vec<f64> {
        let n_rows = y.len();
        y.iter()
            .enumerate()
            .map(|(i, y_)| {
                let p = Self::row_probabilities(yhat, n_rows, num_class, i);
                -p[*y_ as usize].max(PROBABILITY_EPS).ln()
            })
            .collect()
    }

    fn calc_grad_hess(y: &[f32], yhat: &[f64], num_class: usize, grad: &mut [f32], hess: &mut [f32]) {
        let n_rows = y.len();
        for (i, y_) in y.iter().enumerate() {
            let p = Self::row_probabilities(yhat, n_rows, num_class, i);
            let label = *y_ as usize;
            for (k, p_k) in p.iter().enumerate() {
                let target = if k == label { 1.0 } else { 0.0 };
                grad[k * n_rows + i] = (p_k - target) as f32;
                hess[k * n_rows + i] = (2.0 * p_k * (1.0 - p_k)).max(HESSIAN_EPS) as f32;
            }
        }
    }

    fn calc_init(_y: &[f32], num_class: usize) -> Vec<f64> {
        vec![0.0; num_class]
    }

    fn check_labels(y: &[f32], num_class: usize) -> Result<(), TgbmError> {
        match y
            .iter()
            .find(|v| v.fract() != 0.0 || **v < 0.0 || **v >= num_class as f32)
        {
            Some(v) => Err(TgbmError::InvalidParameter(
                "labels".to_string(),
                format!("integer class ids within 0 and {}", num_class - 1),
                v.to_string(),
            )),
            None => Ok(()),
        }
    }

    fn default_metric() -> Metric {
        Metric::MultiClassError
    }
}
