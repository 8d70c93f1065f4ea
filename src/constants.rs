/// Largest usable `max_num_bin`, bin 0 is reserved for missing values.
pub const MAX_BIN_LIMIT: u16 = u16::MAX - 1;
/// Rows accumulated by a single histogram task before partial results are merged.
pub const HISTOGRAM_CHUNK_SIZE: usize = 4096;
/// Lower bound applied to hessians of the probabilistic objectives.
pub const HESSIAN_EPS: f64 = 1e-16;
/// Clamp applied to probabilities before taking logs.
pub const PROBABILITY_EPS: f64 = 1e-7;
/// Version stamped into saved model files.
pub const MODEL_FORMAT_VERSION: u32 = 1;
/// Slot used to derive the bagging seed of a round.
pub const BAGGING_SLOT: u64 = u64::MAX;
/// Largest feature index accepted from a LibSVM file.
pub const MAX_LIBSVM_FEATURE: u32 = 1 << 24;
