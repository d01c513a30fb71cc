use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Separators that may appear anywhere in a textual array UUID.
const UUID_SEPARATORS: &[char] = &[':', '.', ' ', '-'];

/// Number of hex digits in a textual array UUID.
const UUID_HEX_DIGITS: usize = 32;

/// 128-bit array identity, stored as the four 32-bit words of the superblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayUuid(pub [u32; 4]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UuidParseError {
    #[error("Unexpected character '{0}' in UUID")]
    InvalidCharacter(char),
    #[error("Expected 32 hex digits in UUID, found {0}")]
    WrongLength(usize),
}

impl ArrayUuid {
    pub fn words(&self) -> [u32; 4] {
        self.0
    }
}

impl FromStr for ArrayUuid {
    type Err = UuidParseError;

    /// Parses 32 hex nibbles, ignoring `:`, `.`, space and `-` wherever they
    /// appear.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = [0u32; 4];
        let mut digits = 0;

        for c in s.chars() {
            if UUID_SEPARATORS.contains(&c) {
                continue;
            }

            let nibble = c.to_digit(16).ok_or(UuidParseError::InvalidCharacter(c))?;
            if digits < UUID_HEX_DIGITS {
                let word = &mut words[digits / 8];
                *word = (*word << 4) | nibble;
            }
            digits += 1;
        }

        if digits != UUID_HEX_DIGITS {
            return Err(UuidParseError::WrongLength(digits));
        }

        Ok(ArrayUuid(words))
    }
}

impl Display for ArrayUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}:{:08x}:{:08x}:{:08x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_any_separators() {
        let expected = ArrayUuid([0x12345678, 0x9abcdef0, 0x12345678, 0x90abcdef]);

        for text in [
            "1234-5678:9ABC.DEF0 1234567890abcdef",
            "123456789abcdef01234567890abcdef",
            "12345678:9abcdef0:12345678:90abcdef",
            "1-2-3-4-5-6-7-8-9-a-b-c-d-e-f-0-1-2-3-4-5-6-7-8-9-0-a-b-c-d-e-f",
            ":12345678.9ABCDEF0 12345678 90ABCDEF-",
        ] {
            assert_eq!(ArrayUuid::from_str(text).unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn test_parse_wrong_length() {
        assert_eq!(
            ArrayUuid::from_str("1234567").unwrap_err(),
            UuidParseError::WrongLength(7)
        );
        assert_eq!(
            ArrayUuid::from_str("123456789abcdef01234567890abcdef0").unwrap_err(),
            UuidParseError::WrongLength(33)
        );
        assert_eq!(
            ArrayUuid::from_str("").unwrap_err(),
            UuidParseError::WrongLength(0)
        );
        assert_eq!(
            ArrayUuid::from_str("::::").unwrap_err(),
            UuidParseError::WrongLength(0)
        );
    }

    #[test]
    fn test_parse_invalid_character() {
        assert_eq!(
            ArrayUuid::from_str("12345678_9abcdef0123456789abcdef0").unwrap_err(),
            UuidParseError::InvalidCharacter('_')
        );
        assert_eq!(
            ArrayUuid::from_str("g2345678:9abcdef0:12345678:90abcdef").unwrap_err(),
            UuidParseError::InvalidCharacter('g')
        );
    }

    #[test]
    fn test_display_round_trip() {
        let uuid = ArrayUuid([0xdeadbeef, 0x1, 0xabcdef, 0x0]);
        let text = uuid.to_string();
        assert_eq!(text, "deadbeef:00000001:00abcdef:00000000");
        assert_eq!(ArrayUuid::from_str(&text).unwrap(), uuid);
    }
}
