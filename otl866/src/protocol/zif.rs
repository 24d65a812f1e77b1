//! ZIF socket pin masks.
//!
//! The 40-pin socket is addressed as a 40-bit mask, pin 1 in bit 0. On the
//! wire it travels as five two-digit hex bytes, least significant first:
//! pin 1 alone is `0100000000`, pin 40 alone is `0000000080`.

use crate::error::{Error, Result};

/// Number of bytes in a mask.
pub const ZIF_BYTES: usize = 5;

/// Largest representable mask.
pub const ZIF_MAX: u64 = (1 << (8 * ZIF_BYTES)) - 1;

/// Check that `mask` fits in 40 bits.
pub fn check(mask: u64) -> Result<()> {
    if mask > ZIF_MAX {
        return Err(Error::ValueOutOfRange {
            what: "ZIF mask",
            value: mask,
            max: ZIF_MAX,
        });
    }
    Ok(())
}

/// Encode a mask as ten upper-case hex digits, LSB first.
pub fn encode(mask: u64) -> Result<String> {
    check(mask)?;
    Ok(mask
        .to_le_bytes()
        .iter()
        .take(ZIF_BYTES)
        .map(|b| format!("{b:02X}"))
        .collect())
}

/// Decode hex byte pairs, LSB first.
///
/// Pairs may be separated by whitespace (the `Result:` line form) or run
/// together (the argument form).
pub fn decode(text: &str) -> Result<u64> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if digits.is_empty() || digits.len() % 2 != 0 || digits.len() > 2 * 8 {
        return Err(Error::ProtocolViolation(format!(
            "malformed hex mask '{}'",
            text.trim()
        )));
    }

    let mut value = 0u64;
    for (i, pair) in digits
        .chunks(2)
        .enumerate()
    {
        let hex = std::str::from_utf8(pair).map_err(|_| bad_mask(text))?;
        let byte = u8::from_str_radix(hex, 16).map_err(|_| bad_mask(text))?;
        value |= u64::from(byte) << (8 * i);
    }
    Ok(value)
}

fn bad_mask(text: &str) -> Error {
    Error::ProtocolViolation(format!("malformed hex mask '{}'", text.trim()))
}

/// Mask with only 1-based `pin` set.
pub fn pin(pin: u8) -> Result<u64> {
    if !(1..=40).contains(&pin) {
        return Err(Error::ValueOutOfRange {
            what: "ZIF pin",
            value: u64::from(pin),
            max: 40,
        });
    }
    Ok(1 << (pin - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_lsb_first() {
        assert_eq!(encode(0).unwrap(), "0000000000");
        assert_eq!(encode(1).unwrap(), "0100000000");
        assert_eq!(encode(0x80_0000_0000).unwrap(), "0000000080");
        assert_eq!(encode(0x12_3456_789A).unwrap(), "9A78563412");
        assert_eq!(encode(ZIF_MAX).unwrap(), "FFFFFFFFFF");
    }

    #[test]
    fn test_encode_rejects_41_bits() {
        let err = encode(ZIF_MAX + 1).unwrap_err();
        assert!(matches!(
            err,
            Error::ValueOutOfRange { value, max, .. } if value == 1 << 40 && max == ZIF_MAX
        ));
        assert!(encode(u64::MAX).is_err());
    }

    #[test]
    fn test_decode_result_line_forms() {
        assert_eq!(decode("01 00 00 00 80").unwrap(), 0x80_0000_0001);
        assert_eq!(decode("9A78563412").unwrap(), 0x12_3456_789A);
        assert_eq!(decode(" ff ").unwrap(), 0xFF);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("0").is_err());
        assert!(decode("zz").is_err());
    }

    #[test]
    fn test_round_trip_boundaries() {
        for mask in [0, 1, 0xFF, 0x1_0000_0000, 0x55_AA55_AA55, ZIF_MAX] {
            assert_eq!(decode(&encode(mask).unwrap()).unwrap(), mask);
        }
    }

    #[test]
    fn test_pin_mask() {
        assert_eq!(pin(1).unwrap(), 1);
        assert_eq!(pin(40).unwrap(), 1 << 39);
        assert!(pin(0).is_err());
        assert!(pin(41).is_err());
    }
}
