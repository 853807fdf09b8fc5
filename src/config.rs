//! Tuning parameters for pacing the collector, and the log-byte codec used
//! to store them compactly (`luaO_codeparam`/`luaO_applyparam` in lgc.c).

/// Indices into [`GcParams`], mirroring `LUAI_GCPAUSE` et al.
#[derive(Debug, Clone, Copy)]
pub struct GcParams {
    /// Percentage of bytes marked last cycle to wait for before starting a
    /// new one (`gcpause`, §6 PAUSE). Default 250.
    pub pause: u32,
    /// Speed of the collector relative to allocation, as a percentage
    /// (`gcstepmul`, §6 STEPMUL). Default 200.
    pub step_mul: u32,
    /// Size, in bytes, of an incremental step (`gcstepsize`, §6 STEPSIZE).
    /// Default 200 * sizeof(Table)-equivalent; approximated here as 13 KiB.
    pub step_size: u32,
    /// Minor-collection frequency multiplier in generational mode
    /// (`genminormul`, §6 MINORMUL). Default 20.
    pub minor_mul: u32,
    /// Threshold, as a percentage of added-old bytes against bytes live at
    /// the last major collection, past which generational mode switches to
    /// a major collection (§6 MINORMAJOR; 0 disables major). Default 70.
    pub minor_major: u32,
    /// Threshold, as a percentage of to-be-collected bytes against added
    /// bytes, past which a major collection switches back to minor (§6
    /// MAJORMINOR). Default 50.
    pub major_minor: u32,
}

impl Default for GcParams {
    fn default() -> Self {
        GcParams {
            pause: 250,
            step_mul: 200,
            step_size: 13 * 1024,
            minor_mul: 20,
            minor_major: 70,
            major_minor: 50,
        }
    }
}

/// Encodes a byte count as an 8-bit floating-point value (`luaO_codeparam`):
/// 3 mantissa bits, 5 exponent bits, bias towards exactly representing small
/// values and approximating large ones. Used so debt/threshold fields fit in
/// a single byte when the embedder wants to log or snapshot GC state.
pub fn encode_log_byte(mut value: u64) -> u8 {
    let mut exp = 0u8;
    if value < 8 {
        return value as u8;
    }
    while value >= (8 << 4) {
        value = (value + 0xf) >> 4;
        exp += 4;
    }
    while value >= (8 << 1) {
        value = (value + 1) >> 1;
        exp += 1;
    }
    ((exp + 1) << 3) | (value as u8 - 8)
}

pub fn decode_log_byte(byte: u8) -> u64 {
    let exp = byte >> 3;
    if exp == 0 {
        byte as u64
    } else {
        (((byte & 0x7) as u64 + 8) << (exp - 1)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_byte_round_trips_small_values_exactly() {
        for v in 0u64..8 {
            assert_eq!(decode_log_byte(encode_log_byte(v)), v);
        }
    }

    #[test]
    fn log_byte_approximates_large_values_within_tolerance() {
        for v in [1_000u64, 13_312, 1_000_000, 4_000_000_000] {
            let decoded = decode_log_byte(encode_log_byte(v));
            let err = (decoded as f64 - v as f64).abs() / v as f64;
            assert!(err < 0.07, "value {v} decoded to {decoded}, err {err}");
        }
    }
}
