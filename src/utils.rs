use crate::data::FloatData;
use crate::errors::TgbmError;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::convert::TryInto;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    items.join(", ")
}

// Validation
pub fn validate_positive_float_parameter<T: FloatData<T>>(value: T, parameter: &str) -> Result<(), TgbmError> {
    validate_float_parameter(value, T::ZERO, T::INFINITY, parameter)
}

pub fn validate_float_parameter<T: FloatData<T>>(value: T, min: T, max: T, parameter: &str) -> Result<(), TgbmError> {
    if value.is_nan() || value < min || max < value {
        Err(TgbmError::InvalidParameter(
            parameter.to_string(),
            format!("real value within range {} and {}", min, max),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_usize_parameter(value: usize, min: usize, parameter: &str) -> Result<(), TgbmError> {
    if value < min {
        Err(TgbmError::InvalidParameter(
            parameter.to_string(),
            format!("integer of at least {}", min),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Leaf weight given the gradient and hessian sums of a node.
#[inline]
pub fn weight(gradient_sum: f64, hessian_sum: f64, lambda: f64) -> f64 {
    -gradient_sum / (hessian_sum + lambda)
}

/// Structure score of a node, the split gain is half the difference
/// between the children and the parent scores.
#[inline]
pub fn gain(gradient_sum: f64, hessian_sum: f64, lambda: f64) -> f64 {
    (gradient_sum * gradient_sum) / (hessian_sum + lambda)
}

const LANES: usize = 16;

/// Fast summation using f64 lanes, so that summing f32 values
/// does not lose precision.
#[inline]
pub fn fast_f64_sum(values: &[f32]) -> f64 {
    let chunks = values.chunks_exact(LANES);
    let remainder = chunks.remainder();

    let sum = chunks.fold([0.0_f64; LANES], |mut acc, chunk| {
        let chunk: [f32; LANES] = chunk.try_into().unwrap_or([0.0; LANES]);
        for i in 0..LANES {
            acc[i] += f64::from(chunk[i]);
        }
        acc
    });

    let remainder: f64 = remainder.iter().fold(0.0, |acc, b| acc + f64::from(*b));
    sum.iter().sum::<f64>() + remainder
}

/// Naive weighted percentiles calculation.
///
/// * `v` - A Vector of which to find percentiles for, without missing values.
/// * `sample_weight` - Sample weights for the instances of the vector.
/// * `percentiles` - Percentiles to look for in the data. This should be
///     values from 0 to 1, and in sorted order.
pub fn percentiles<T>(v: &[T], sample_weight: &[T], percentiles: &[T]) -> Vec<T>
where
    T: FloatData<T>,
{
    let mut p = Vec::new();
    if v.is_empty() {
        return p;
    }
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_by(|a, b| v[*a].partial_cmp(&v[*b]).unwrap_or(Ordering::Equal));

    let mut pcts = VecDeque::from_iter(percentiles.iter());
    let mut current_pct = match pcts.pop_front() {
        Some(pct) => *pct,
        None => return p,
    };

    let mut cuml_pct = T::ZERO;
    let total_values: T = sample_weight.iter().copied().sum();

    for i in idx.iter() {
        let current_value = v[*i];
        cuml_pct += sample_weight[*i] / total_values;
        if (current_pct == T::ZERO) || (cuml_pct >= current_pct) {
            // The same value can satisfy several percentiles.
            while cuml_pct >= current_pct {
                p.push(current_value);
                match pcts.pop_front() {
                    Some(p_) => current_pct = *p_,
                    None => return p,
                }
            }
        } else if current_pct == T::ONE {
            if let Some(i_) = idx.last() {
                p.push(v[*i_]);
                break;
            }
        }
    }
    p
}

/// Number of cut values less than or equal to `v`, a binary search
/// over the sorted cuts. Missing values map to 0.
///
/// * `x` - The sorted slice of cut values.
/// * `v` - The value to locate.
#[inline]
pub fn map_bin<T: FloatData<T>>(x: &[T], v: &T) -> Option<u16> {
    if v.is_nan() {
        return Some(0);
    }
    let mut low = 0;
    let mut high = x.len();
    while low != high {
        let mid = (low + high) / 2;
        if x[mid] <= *v {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    u16::try_from(low).ok()
}

/// Derive an independent seed for a `(round, slot)` pair from the run seed.
///
/// Uses the splitmix64 finalizer so neighbouring rounds and slots
/// produce unrelated streams.
pub fn derive_seed(seed: u64, round: usize, slot: u64) -> u64 {
    let mut z = seed
        .wrapping_add((round as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(slot.wrapping_mul(0xD1B5_4A32_D192_ED03));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
