//! Fixed-point casts for building weight vectors from real values.
//!
//! A `bits`-wide fixed-point value `v` represents `v / 2^(bits-1)`, so the
//! 8-bit weights cover `[-1, 127/128]`. Widths are clamped to `1..=63`.

/// Convert a real in `[-1, 1]` to a `bits`-wide fixed-point integer.
///
/// Truncates toward zero and saturates at the representable range.
pub fn float_to_fixed(bits: u32, x: f64) -> i64 {
    let bits = bits.clamp(1, 63);
    let factor = (1i64 << (bits - 1)) as f64;
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    ((factor * x) as i64).clamp(min, max)
}

/// Convert a `bits`-wide fixed-point integer back to a real.
pub fn fixed_to_float(bits: u32, v: i64) -> f64 {
    let bits = bits.clamp(1, 63);
    v as f64 / (1i64 << (bits - 1)) as f64
}

/// Quantize real weights to signed 8-bit weights.
pub fn quantize_weights(values: &[f64]) -> Vec<i8> {
    values
        .iter()
        .map(|&x| float_to_fixed(8, x) as i8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_fixed() {
        assert_eq!(float_to_fixed(8, 0.5), 64);
        assert_eq!(float_to_fixed(8, -0.5), -64);
        assert_eq!(float_to_fixed(8, -1.0), -128);
        assert_eq!(float_to_fixed(8, 0.0), 0);
    }

    #[test]
    fn test_float_to_fixed_saturates() {
        assert_eq!(float_to_fixed(8, 1.0), 127);
        assert_eq!(float_to_fixed(8, 3.0), 127);
        assert_eq!(float_to_fixed(8, -3.0), -128);
    }

    #[test]
    fn test_fixed_to_float() {
        assert_eq!(fixed_to_float(8, 64), 0.5);
        assert_eq!(fixed_to_float(8, -128), -1.0);
        assert_eq!(fixed_to_float(16, 16384), 0.5);
    }

    #[test]
    fn test_out_of_range_widths() {
        // Zero acts as a 1-bit width: only -1 and 0 are representable
        assert_eq!(float_to_fixed(0, 0.9), 0);
        assert_eq!(float_to_fixed(0, -1.0), -1);
        assert_eq!(fixed_to_float(0, -1), -1.0);

        assert_eq!(float_to_fixed(64, 0.5), 1i64 << 61);
        assert_eq!(fixed_to_float(64, 1i64 << 61), 0.5);
        assert_eq!(float_to_fixed(200, -1.0), -(1i64 << 62));
    }

    #[test]
    fn test_quantize_weights() {
        assert_eq!(quantize_weights(&[0.25, -0.25, 1.0]), vec![32, -32, 127]);
    }
}
