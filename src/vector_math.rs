//! Pure numeric helpers over embedding vectors.
//!
//! Everything here is stateless. The record service uses these for validation and the in-memory
//! backend uses them for ranking; nothing in this module touches storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorMathError {
    #[error("Vector must be an array of numbers")]
    NotAnArray,
    #[error("Vector cannot be empty")]
    EmptyVector,
    #[error("Vector contains invalid numbers (NaN or Infinity)")]
    InvalidNumbers,
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Vector dimension {actual} exceeds maximum of {max}")]
    DimensionExceeded { actual: usize, max: usize },
    #[error("Cannot compute over an empty set of vectors")]
    EmptySet,
}

pub type MathResult<T> = std::result::Result<T, VectorMathError>;

fn ensure_same_len(a: &[f32], b: &[f32]) -> MathResult<()> {
    if a.len() != b.len() {
        return Err(VectorMathError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

// Sums run in f64: squaring a finite f32 near its range overflows to infinity.
fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn magnitude_f64(v: &[f32]) -> f64 {
    dot_f64(v, v).sqrt()
}

pub fn dot_product(a: &[f32], b: &[f32]) -> MathResult<f32> {
    ensure_same_len(a, b)?;
    Ok(dot_f64(a, b) as f32)
}

/// L2 norm.
pub fn magnitude(v: &[f32]) -> f32 {
    magnitude_f64(v) as f32
}

/// Cosine of the angle between `a` and `b`. Zero when either side has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> MathResult<f32> {
    ensure_same_len(a, b)?;
    let denominator = magnitude_f64(a) * magnitude_f64(b);
    if denominator == 0.0 {
        return Ok(0.0);
    }
    // Rounding can push |a.a| / (|a||a|) a hair past 1.0.
    Ok(((dot_f64(a, b) / denominator) as f32).clamp(-1.0, 1.0))
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> MathResult<f32> {
    ensure_same_len(a, b)?;
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Ok(sum.sqrt() as f32)
}

/// Scales `v` to unit length. A zero vector comes back unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mag = magnitude_f64(v);
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| (f64::from(*x) / mag) as f32).collect()
}

/// True iff every element is finite. Does not look at length.
pub fn is_valid_vector(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

pub fn validate_vector(
    v: &[f32],
    expected_dimensions: Option<usize>,
    max_dimensions: usize,
) -> MathResult<()> {
    if v.is_empty() {
        return Err(VectorMathError::EmptyVector);
    }
    if !is_valid_vector(v) {
        return Err(VectorMathError::InvalidNumbers);
    }
    if let Some(expected) = expected_dimensions {
        if v.len() != expected {
            return Err(VectorMathError::DimensionMismatch {
                expected,
                actual: v.len(),
            });
        }
    }
    if v.len() > max_dimensions {
        return Err(VectorMathError::DimensionExceeded {
            actual: v.len(),
            max: max_dimensions,
        });
    }
    Ok(())
}

/// Reads an untyped JSON payload into a vector and validates it.
///
/// Values that overflow `f32` become infinite and are rejected as `InvalidNumbers`.
pub fn vector_from_json(
    value: &Value,
    expected_dimensions: Option<usize>,
    max_dimensions: usize,
) -> MathResult<Vec<f32>> {
    let items = value.as_array().ok_or(VectorMathError::NotAnArray)?;
    let vector = items
        .iter()
        .map(|item| {
            item.as_f64()
                .map(|n| n as f32)
                .ok_or(VectorMathError::InvalidNumbers)
        })
        .collect::<MathResult<Vec<f32>>>()?;
    validate_vector(&vector, expected_dimensions, max_dimensions)?;
    Ok(vector)
}

/// Elementwise mean of a set of equal-length vectors.
pub fn centroid<V: AsRef<[f32]>>(vectors: &[V]) -> MathResult<Vec<f32>> {
    let first = vectors.first().ok_or(VectorMathError::EmptySet)?.as_ref();
    let mut sums = vec![0.0f64; first.len()];

    for vector in vectors {
        let vector = vector.as_ref();
        ensure_same_len(first, vector)?;
        for (sum, x) in sums.iter_mut().zip(vector) {
            *sum += f64::from(*x);
        }
    }

    let count = vectors.len() as f64;
    Ok(sums.into_iter().map(|s| (s / count) as f32).collect())
}

pub fn round_vector(v: &[f32], precision: u32) -> Vec<f32> {
    let factor = 10f64.powi(precision as i32);
    v.iter()
        .map(|x| ((f64::from(*x) * factor).round() / factor) as f32)
        .collect()
}

/// Maps `f` over `items` in chunks of `batch_size`.
///
/// Output order and content match `items.iter().map(f)`; chunking only bounds how much work is
/// in flight per pass.
pub fn batch_process<T, R, F>(items: &[T], mut f: F, batch_size: usize) -> Vec<R>
where
    F: FnMut(&T) -> R,
{
    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(batch_size.max(1)) {
        results.extend(chunk.iter().map(&mut f));
    }
    results
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStatistics {
    pub count: usize,
    pub dimensions: usize,
    pub mean_magnitude: f32,
    pub min_magnitude: f32,
    pub max_magnitude: f32,
    pub dimension_stats: Vec<DimensionStats>,
}

/// Summary statistics over a set of vectors. `Ok(None)` for an empty set.
///
/// Per-coordinate `std` is the population standard deviation (divisor = count).
pub fn vector_statistics<V: AsRef<[f32]>>(vectors: &[V]) -> MathResult<Option<VectorStatistics>> {
    let Some(first) = vectors.first() else {
        return Ok(None);
    };
    let dimensions = first.as_ref().len();
    let count = vectors.len();

    let mut magnitudes = Vec::with_capacity(count);
    let mut mins = vec![f32::INFINITY; dimensions];
    let mut maxs = vec![f32::NEG_INFINITY; dimensions];
    let mut sums = vec![0.0f64; dimensions];

    for vector in vectors {
        let vector = vector.as_ref();
        ensure_same_len(first.as_ref(), vector)?;
        magnitudes.push(magnitude(vector));
        for (i, x) in vector.iter().enumerate() {
            mins[i] = mins[i].min(*x);
            maxs[i] = maxs[i].max(*x);
            sums[i] += f64::from(*x);
        }
    }

    let n = count as f64;
    let means: Vec<f64> = sums.iter().map(|s| s / n).collect();
    let mut squared_deviations = vec![0.0f64; dimensions];
    for vector in vectors {
        for (i, x) in vector.as_ref().iter().enumerate() {
            let d = f64::from(*x) - means[i];
            squared_deviations[i] += d * d;
        }
    }

    let dimension_stats = (0..dimensions)
        .map(|i| DimensionStats {
            min: mins[i],
            max: maxs[i],
            mean: means[i] as f32,
            std: (squared_deviations[i] / n).sqrt() as f32,
        })
        .collect();

    let mean_magnitude =
        (magnitudes.iter().map(|m| f64::from(*m)).sum::<f64>() / n) as f32;
    let min_magnitude = magnitudes.iter().copied().fold(f32::INFINITY, f32::min);
    let max_magnitude = magnitudes.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    Ok(Some(VectorStatistics {
        count,
        dimensions,
        mean_magnitude,
        min_magnitude,
        max_magnitude,
        dimension_stats,
    }))
}
