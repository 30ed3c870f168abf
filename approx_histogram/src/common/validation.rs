//! Validation utilities for constructor parameters and deserialization

use crate::common::{Result, SketchError};

/// Minimum number of bins a histogram sketch can hold
pub const MIN_CAPACITY: usize = 2;

/// Maximum serialized sketch size (256MB) to prevent resource exhaustion
pub const MAX_BYTE_SIZE: usize = 256 * 1024 * 1024; // 256MB

/// Largest capacity whose dense serialized form fits in [`MAX_BYTE_SIZE`]
pub const MAX_CAPACITY: usize = (MAX_BYTE_SIZE - 17) / 12;

/// Dense serialized size for a given capacity: header plus one f32
/// position and one i64 bin word per slot. Only meaningful for capacities
/// within [`MAX_CAPACITY`].
pub const fn dense_byte_size(size: usize) -> usize {
    17 + 12 * size
}

/// Validate that a histogram capacity is within
/// [[`MIN_CAPACITY`], [`MAX_CAPACITY`]]
pub fn validate_capacity(size: usize) -> Result<()> {
    if size < MIN_CAPACITY {
        return Err(SketchError::InvalidCapacity {
            param: "size".to_string(),
            value: size.to_string(),
            constraint: format!("must be at least {}", MIN_CAPACITY),
        });
    }
    if size > MAX_CAPACITY {
        return Err(SketchError::InvalidCapacity {
            param: "size".to_string(),
            value: size.to_string(),
            constraint: format!("must not exceed {}", MAX_CAPACITY),
        });
    }
    Ok(())
}

/// Validate that an offered sample is finite
pub fn validate_sample(value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(SketchError::InvalidSample {
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate that a value is a valid quantile probability (0.0 < p < 1.0)
pub fn validate_probability(value: f32) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(SketchError::InvalidProbability {
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate clamp limits: neither may be NaN and the lower bound must not
/// exceed the upper bound (infinities mean "unbounded" and are fine)
pub fn validate_limits(lower: f32, upper: f32) -> Result<()> {
    if lower.is_nan() || upper.is_nan() || lower > upper {
        return Err(SketchError::InvalidCapacity {
            param: "limits".to_string(),
            value: format!("[{}, {}]", lower, upper),
            constraint: "lower limit must not be NaN or exceed the upper limit".to_string(),
        });
    }
    Ok(())
}

/// Validate that a caller-supplied scratch buffer is large enough
pub fn validate_scratch(needed: usize, actual: usize) -> Result<()> {
    if actual < needed {
        return Err(SketchError::BufferTooSmall { needed, actual });
    }
    Ok(())
}

/// Validate minimum required bytes for a deserialization header
pub fn validate_min_size(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(SketchError::MalformedSerialization {
            reason: format!(
                "insufficient data: need at least {} bytes, got {}",
                required, actual
            ),
        });
    }
    Ok(())
}
