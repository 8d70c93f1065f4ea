// Modules
pub mod bin;
pub mod binning;
pub mod booster;
pub mod config;
pub mod constants;
pub mod data;
pub mod dataset;
pub mod device;
pub mod engine;
pub mod ensemble;
pub mod errors;
pub mod grower;
pub mod histogram;
pub mod metric;
pub mod node;
pub mod objective;
pub mod sampler;
pub mod splitter;
pub mod tree;
pub mod utils;

// Individual classes, and functions
pub use config::{ModelIO, TrainingConfig};
pub use data::{Features, Matrix, SparseMatrix};
pub use engine::{Engine, TrainStatus};
pub use ensemble::Ensemble;
pub use errors::TgbmError;
