//! Capacity normalisation
//!
//! Requests carry capacity as a human string ("5TB", "500Gi") or a plain byte
//! count. Provisioners only accept byte counts.

use crate::error::{Error, Result};

/// Parse a capacity string to bytes.
///
/// SI units (K, KB, M, MB, ...) are powers of 1000, IEC units (Ki, KiB, ...)
/// powers of 1024. A bare number is already bytes.
pub fn to_bytes(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    // Find where the number ends and unit begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1_000,
        "M" | "MB" => 1_000_000,
        "G" | "GB" => 1_000_000_000,
        "T" | "TB" => 1_000_000_000_000,
        "P" | "PB" => 1_000_000_000_000_000,
        "KI" | "KIB" => 1 << 10,
        "MI" | "MIB" => 1 << 20,
        "GI" | "GIB" => 1 << 30,
        "TI" | "TIB" => 1 << 40,
        "PI" | "PIB" => 1 << 50,
        _ => {
            return Err(Error::CapacityParse(format!(
                "unknown unit: {}",
                unit_str
            )))
        }
    };

    // Integers stay exact; fractions go through f64
    if let Ok(whole) = num_str.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| Error::CapacityParse(format!("capacity overflows: {}", s)));
    }

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let bytes = num * multiplier as f64;
    // u64::MAX as f64 rounds up to 2^64, so equality already overflows
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::CapacityParse(format!("capacity overflows: {}", s)));
    }
    Ok(bytes as u64)
}

/// Byte count rendered the way the provisioners expect it in a spec
pub fn to_byte_string(s: &str) -> Result<String> {
    to_bytes(s).map(|bytes| bytes.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes() {
        assert_eq!(to_bytes("100").unwrap(), 100);
        assert_eq!(to_bytes("100B").unwrap(), 100);
        assert_eq!(to_bytes("1K").unwrap(), 1_000);
        assert_eq!(to_bytes("1Ki").unwrap(), 1024);
        assert_eq!(to_bytes("5TB").unwrap(), 5_000_000_000_000);
        assert_eq!(to_bytes("5tb").unwrap(), 5_000_000_000_000);
        assert_eq!(to_bytes("100Gi").unwrap(), 100 * 1024 * 1024 * 1024);
        assert_eq!(to_bytes("1.5GB").unwrap(), 1_500_000_000);
        assert_eq!(to_bytes(" 2 TiB ").unwrap(), 2 * (1u64 << 40));

        assert!(to_bytes("").is_err());
        assert!(to_bytes("abc").is_err());
        assert!(to_bytes("100X").is_err());
        assert!(to_bytes("99999999999PB").is_err());
    }

    #[test]
    fn test_fractional_overflow_is_rejected() {
        assert!(matches!(
            to_bytes("99999999999.5PB"),
            Err(Error::CapacityParse(msg)) if msg.contains("overflows")
        ));
        assert!(to_bytes("18446744073709551616.0").is_err());
        assert_eq!(to_bytes("16383.5PiB").unwrap(), 16383 * (1u64 << 50) + (1u64 << 49));
    }

    #[test]
    fn test_to_byte_string() {
        assert_eq!(to_byte_string("2GB").unwrap(), "2000000000");
    }
}
