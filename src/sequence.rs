//! Geometric parameter sweeps for benchmark definitions

use crate::errors::{ExtrasError, Result};

/// Like a range, but each term is `factor` times the previous one.
///
/// `start` is inclusive and `end` exclusive, e.g. `sequence(1, 65, 2)` gives
/// node counts `1, 2, 4, ..., 64`. An empty range is empty whatever the
/// factor.
pub fn sequence(start: u64, end: u64, factor: u64) -> Result<Vec<u64>> {
    if start >= end {
        return Ok(Vec::new());
    }
    if start == 0 {
        return Err(ExtrasError::InvalidSequence {
            reason: "start must be positive".to_string(),
        });
    }
    if factor < 2 {
        return Err(ExtrasError::InvalidSequence {
            reason: format!("factor must be at least 2, got {}", factor),
        });
    }

    let mut values = Vec::new();
    let mut v = start;
    while v < end {
        values.push(v);
        match v.checked_mul(factor) {
            Some(next) => v = next,
            None => break,
        }
    }
    Ok(values)
}
