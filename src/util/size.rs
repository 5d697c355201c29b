//! Byte-size parsing and formatting with decimal (SI) multipliers.
//!
//! `0.5MB` means 500 000 bytes, matching how operators size fragments and
//! resources against backend blob limits.

const UNITS: [(&str, u64); 4] = [("GB", 1_000_000_000), ("MB", 1_000_000), ("KB", 1_000), ("B", 1)];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid size {0:?} (expected e.g. 500000, 500KB or 0.5MB)")]
pub struct ParseSizeError(pub String);

/// Parse a human size like `5MB`, `0.5MB`, `1000` or `750 KB` into bytes.
pub fn parse_size(input: &str) -> Result<u64, ParseSizeError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseSizeError(input.to_string()));
    }
    let upper = s.to_ascii_uppercase();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim_end(), *mult)))
        .unwrap_or((upper.as_str(), 1));

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ParseSizeError(input.to_string()))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ParseSizeError(input.to_string()));
    }
    Ok((value * multiplier as f64).round() as u64)
}

/// Render a byte count with the largest SI unit that keeps it readable.
pub fn format_size(bytes: u64) -> String {
    for (suffix, mult) in UNITS {
        if mult > 1 && bytes >= mult {
            return format!("{:.2} {}", bytes as f64 / mult as f64, suffix);
        }
    }
    format!("{bytes} B")
}
