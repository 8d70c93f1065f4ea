use crate::constants::PROBABILITY_EPS;
use crate::objective::{sigmoid, softmax};
use std::fmt;

/// `y`, class major raw margins, number of classes.
pub type MetricFn = fn(&[f32], &[f64], usize) -> f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    RootMeanSquaredError,
    LogLoss,
    MultiClassError,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Metric::RootMeanSquaredError => "rmse",
            Metric::LogLoss => "logloss",
            Metric::MultiClassError => "merror",
        };
        write!(f, "{}", name)
    }
}

pub fn metric_callables(metric_type: &Metric) -> MetricFn {
    match metric_type {
        Metric::RootMeanSquaredError => RootMeanSquaredErrorMetric::calculate_metric,
        Metric::LogLoss => LogLossMetric::calculate_metric,
        Metric::MultiClassError => MultiClassErrorMetric::calculate_metric,
    }
}

pub trait EvaluationMetric {
    fn calculate_metric(y: &[f32], yhat: &[f64], num_class: usize) -> f64;
}

pub struct RootMeanSquaredErrorMetric {}
impl EvaluationMetric for RootMeanSquaredErrorMetric {
    fn calculate_metric(y: &[f32], yhat: &[f64], _num_class: usize) -> f64 {
        root_mean_squared_error(y, yhat)
    }
}

pub struct LogLossMetric {}
impl EvaluationMetric for LogLossMetric {
    fn calculate_metric(y: &[f32], yhat: &[f64], _num_class: usize) -> f64 {
        log_loss(y, yhat)
    }
}

pub struct MultiClassErrorMetric {}
impl EvaluationMetric for MultiClassErrorMetric {
    fn calculate_metric(y: &[f32], yhat: &[f64], num_class: usize) -> f64 {
        multi_class_error(y, yhat, num_class)
    }
}

pub fn root_mean_squared_error(y: &[f32], yhat: &[f64]) -> f64 {
    let total: f64 = y
        .iter()
        .zip(yhat)
        .map(|(y_, yhat_)| (f64::from(*y_) - *yhat_).powi(2))
        .sum();
    (total / y.len() as f64).sqrt()
}

/// Log loss of raw margins.
pub fn log_loss(y: &[f32], yhat: &[f64]) -> f64 {
    let total: f64 = y
        .iter()
        .zip(yhat)
        .map(|(y_, yhat_)| {
            let p = sigmoid(*yhat_).clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS);
            let y_ = f64::from(*y_);
            -(y_ * p.ln() + (1.0 - y_) * (1.0 - p).ln())
        })
        .sum();
    total / y.len() as f64
}

/// Share of rows whose most probable class is not the label.
pub fn multi_class_error(y: &[f32], yhat: &[f64], num_class: usize) -> f64 {
    let n_rows = y.len();
    let wrong = y
        .iter()
        .enumerate()
        .filter(|(i, y_)| {
            let row: Vec<f64> = (0..num_class).map(|k| yhat[k * n_rows + i]).collect();
            let p = softmax(&row);
            let mut best = 0;
            for (k, p_k) in p.iter().enumerate() {
                if *p_k > p[best] {
                    best = k;
                }
            }
            best != **y_ as usize
        })
        .count();
    wrong as f64 / n_rows as f64
}
