use crate::{CubicleError, CubicleResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a Docker style memory size (`"2g"`, `"512m"`, `"1.5Gi"`, `"1073741824"`) to bytes.
///
/// Units are binary: `k` is 1024 bytes, `m` is 1024² and so on. A bare number is taken as bytes.
pub fn parse_memory_size(size: &str) -> CubicleResult<i64> {
    let invalid = || CubicleError::InvalidMemorySize(size.to_string());
    let trimmed = size.trim();

    let split_idx = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (num_str, unit) = trimmed.split_at(split_idx);

    if num_str.is_empty() {
        return Err(invalid());
    }

    let multiplier: i64 = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1024,
        "M" | "MB" | "MI" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GI" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TI" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    if unit.is_empty() {
        return num_str.parse::<i64>().map_err(|_| invalid());
    }

    let num: f64 = num_str.parse().map_err(|_| invalid())?;
    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > i64::MAX as f64 {
        return Err(invalid());
    }

    Ok(bytes as i64)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
