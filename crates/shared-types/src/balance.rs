//! # Colored Balances
//!
//! A transfer output carries a list of `(color, value)` pairs. Colors are
//! 32-byte tags with two reserved sentinels:
//!
//! - `IOTA`: the uncolored base token.
//! - `NEW`: a minting placeholder that is only legal on the input side of a
//!   transfer; it never appears as a stored output color.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{define_id, fmt_id_bytes, InvalidLength, ID_LENGTH};

define_id! {
    /// 32-byte color tag attached to a balance.
    Color
}

/// The uncolored base token.
pub const COLOR_IOTA: Color = Color::from_tag("IOTA");

/// Minting placeholder; legal in transfer inputs only.
pub const COLOR_NEW: Color = Color::from_tag("NEW");

/// A value of a single color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredBalance {
    color: Color,
    value: u64,
}

impl ColoredBalance {
    /// Serialized width: color tag followed by the value as u64 LE.
    pub const MARSHALED_LENGTH: usize = ID_LENGTH + 8;

    pub fn new(color: Color, value: u64) -> Self {
        Self { color, value }
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn marshal_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.color.as_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
    }

    /// Reads a balance from the front of `data`.
    pub fn unmarshal(data: &[u8]) -> Result<Self, InvalidLength> {
        if data.len() < Self::MARSHALED_LENGTH {
            return Err(InvalidLength {
                expected: Self::MARSHALED_LENGTH,
                found: data.len(),
            });
        }
        let color = Color::from_slice(data)?;
        let mut value_bytes = [0u8; 8];
        value_bytes.copy_from_slice(&data[ID_LENGTH..Self::MARSHALED_LENGTH]);
        Ok(Self {
            color,
            value: u64::from_le_bytes(value_bytes),
        })
    }
}

impl fmt::Display for ColoredBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.color, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_colors_are_distinct_tags() {
        assert_ne!(COLOR_IOTA, COLOR_NEW);
        assert_eq!(COLOR_IOTA.to_string(), "IOTA");
        assert_eq!(COLOR_NEW.to_string(), "NEW");
    }

    #[test]
    fn test_balance_marshal_round_trip() {
        let balance = ColoredBalance::new(COLOR_IOTA, 1337);
        let mut bytes = Vec::new();
        balance.marshal_into(&mut bytes);
        assert_eq!(bytes.len(), ColoredBalance::MARSHALED_LENGTH);

        let decoded = ColoredBalance::unmarshal(&bytes).unwrap();
        assert_eq!(decoded, balance);
    }

    #[test]
    fn test_balance_value_is_little_endian() {
        let balance = ColoredBalance::new(Color::from_tag("X"), 0x0102_0304);
        let mut bytes = Vec::new();
        balance.marshal_into(&mut bytes);
        assert_eq!(&bytes[ID_LENGTH..ID_LENGTH + 4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_unmarshal_rejects_truncated_input() {
        let err = ColoredBalance::unmarshal(&[0u8; 12]).unwrap_err();
        assert_eq!(err.expected, ColoredBalance::MARSHALED_LENGTH);
    }

    #[test]
    fn test_display_renders_color_and_value() {
        let balance = ColoredBalance::new(COLOR_IOTA, 100);
        assert_eq!(balance.to_string(), "IOTA: 100");
    }
}
