use crate::constants::{DEFAULT_PART_SIZE, MAXIMUM_MULTIPART_NUMBER, MAXIMUM_OBJECT_SIZE, MAXIMUM_PART_SIZE};
use crate::error::{ShuttleError, ShuttleResult};

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Part size for a segmented upload of `total_size` bytes using the default
/// preferred part size.
pub fn calculate_part_size(total_size: u64) -> ShuttleResult<u64> {
    calculate_part_size_with(total_size, DEFAULT_PART_SIZE)
}

/// Part size for a segmented upload of `total_size` bytes.
///
/// `preferred` is kept whenever it yields at most
/// [`MAXIMUM_MULTIPART_NUMBER`] parts; otherwise the part size grows to
/// `ceil(total_size / MAXIMUM_MULTIPART_NUMBER)`. Totals above
/// [`MAXIMUM_OBJECT_SIZE`] are rejected before anything is computed.
pub fn calculate_part_size_with(total_size: u64, preferred: u64) -> ShuttleResult<u64> {
    if total_size > MAXIMUM_OBJECT_SIZE {
        return Err(ShuttleError::SizeExceeded {
            size: total_size,
            max: MAXIMUM_OBJECT_SIZE,
        });
    }
    if preferred == 0 || preferred > MAXIMUM_PART_SIZE {
        return Err(ShuttleError::InvalidPartSize {
            part_size: preferred,
            max: MAXIMUM_PART_SIZE,
        });
    }

    if total_size.div_ceil(preferred) <= MAXIMUM_MULTIPART_NUMBER {
        return Ok(preferred);
    }

    // Bounded by MAXIMUM_PART_SIZE because total_size <= MAXIMUM_OBJECT_SIZE.
    Ok(total_size.div_ceil(MAXIMUM_MULTIPART_NUMBER))
}

/// Maps `key`, which lives under `from`, onto the same relative position
/// under `to`. Keys outside `from` are returned unchanged.
pub fn rebase_key(key: &str, from: &str, to: &str) -> String {
    let from = from.trim_end_matches('/');
    let to = to.trim_end_matches('/');

    let relative = if from.is_empty() {
        Some(key)
    } else {
        key.strip_prefix(from).and_then(|rest| rest.strip_prefix('/'))
    };

    match relative {
        Some(rest) if to.is_empty() => rest.to_string(),
        Some(rest) => format!("{}/{}", to, rest),
        None => key.to_string(),
    }
}
