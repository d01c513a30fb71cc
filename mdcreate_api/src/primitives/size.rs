use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeParseError {
    #[error(transparent)]
    Invalid(#[from] ParseIntError),
    #[error("Size '{0}' does not fit in 64 bits of KiB")]
    Overflow(String),
}

/// A size in KiB, the unit md uses for array and chunk sizes. Zero means
/// "choose a default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct KibCount(pub u64);

impl From<u64> for KibCount {
    fn from(x: u64) -> Self {
        KibCount(x)
    }
}

impl KibCount {
    pub fn kib(self) -> u64 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn to_human_readable(&self) -> String {
        match self.0.trailing_zeros() {
            _ if self.0 == 0 => "0".to_owned(),
            0..=9 => format!("{}K", self.0),
            10..=19 => format!("{}M", self.0 >> 10),
            20..=29 => format!("{}G", self.0 >> 20),
            _ => format!("{}T", self.0 >> 30),
        }
    }

    /// Plain numbers are KiB; `K`, `M`, `G` and `T` suffixes scale from there.
    pub fn from_human_readable(mut s: &str) -> Result<Self, SizeParseError> {
        s = s.trim();
        let try_parse = |val: &str, shift: u32| {
            val.trim()
                .parse::<u64>()?
                .checked_mul(1 << shift)
                .map(Self)
                .ok_or_else(|| SizeParseError::Overflow(s.to_owned()))
        };
        if let Some(p) = s.strip_suffix('K') {
            try_parse(p, 0)
        } else if let Some(p) = s.strip_suffix('M') {
            try_parse(p, 10)
        } else if let Some(p) = s.strip_suffix('G') {
            try_parse(p, 20)
        } else if let Some(p) = s.strip_suffix('T') {
            try_parse(p, 30)
        } else {
            try_parse(s, 0)
        }
    }
}

impl Display for KibCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl FromStr for KibCount {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_human_readable(s.trim())
    }
}

impl<'de> serde::Deserialize<'de> for KibCount {
    fn deserialize<D>(deserializer: D) -> Result<KibCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "64K") or as a pure number
        // (e.g. 64). Serde forces a number when only digits are provided, so
        // we need to deserialize as a generic value and then check the type.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => KibCount::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid size, expected unsigned integer")
                })?;
                Ok(KibCount(n))
            }
            _ => Err(serde::de::Error::custom("invalid size")),
        }
    }
}

/// Renders `bytes` in both binary and decimal units for log messages, or
/// nothing for sizes below 5000 KiB.
pub fn human_size(bytes: u64) -> String {
    const MIB: u64 = 0x10_0000;

    if bytes < 5000 * 1024 {
        String::new()
    } else if bytes < 2 * 1024 * 1024 * 1024 {
        format!(
            " ({}.{:02} MiB {}.{:02} MB)",
            bytes >> 20,
            (bytes & 0xfffff) / (MIB / 100),
            bytes / 1000 / 1000,
            (bytes % 1_000_000) / 10_000
        )
    } else {
        format!(
            " ({}.{:02} GiB {}.{:02} GB)",
            bytes >> 30,
            ((bytes >> 10) & 0xfffff) / (MIB / 100),
            bytes / 1000 / 1000 / 1000,
            ((bytes / 1000) % 1_000_000) / 10_000
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kib_count_from_human_readable() {
        assert_eq!(KibCount::from_str("64").unwrap(), KibCount(64));
        assert_eq!(KibCount::from_str("64K").unwrap(), KibCount(64));
        assert_eq!(KibCount::from_str(" 2M ").unwrap(), KibCount(2048));
        assert_eq!(KibCount::from_str("1G").unwrap(), KibCount(1 << 20));
        assert_eq!(KibCount::from_str("3T").unwrap(), KibCount(3 << 30));
        KibCount::from_str("64X").unwrap_err();
        KibCount::from_str("").unwrap_err();
    }

    #[test]
    fn test_kib_count_suffix_overflow() {
        assert_eq!(
            KibCount::from_str("16777215T").unwrap(),
            KibCount(16777215 << 30)
        );
        assert_eq!(
            KibCount::from_str("17179869184T").unwrap_err(),
            SizeParseError::Overflow("17179869184T".into())
        );
        assert_eq!(
            KibCount::from_str("18014398509481984M").unwrap_err(),
            SizeParseError::Overflow("18014398509481984M".into())
        );
        assert!(matches!(
            KibCount::from_str("64X").unwrap_err(),
            SizeParseError::Invalid(_)
        ));

        let error = serde_yaml::from_str::<KibCount>("17179869184T").unwrap_err();
        assert!(error.to_string().contains("does not fit"));
    }

    #[test]
    fn test_kib_count_to_human_readable() {
        assert_eq!(KibCount(0).to_string(), "0");
        assert_eq!(KibCount(99000).to_string(), "99000K");
        assert_eq!(KibCount(2048).to_string(), "2M");
        assert_eq!(KibCount(1 << 20).to_string(), "1G");
        assert_eq!(KibCount(5 << 30).to_string(), "5T");
        assert!(KibCount(0).is_unset());
    }

    #[test]
    fn test_kib_count_deserialize() {
        let size: KibCount = serde_yaml::from_str("99000").unwrap();
        assert_eq!(size, KibCount(99000));
        let size: KibCount = serde_yaml::from_str("\"4M\"").unwrap();
        assert_eq!(size, KibCount(4096));
        let size: KibCount = serde_yaml::from_str("4M").unwrap();
        assert_eq!(size, KibCount(4096));
        serde_yaml::from_str::<KibCount>("-1").unwrap_err();
        serde_yaml::from_str::<KibCount>("[1]").unwrap_err();
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "");
        assert_eq!(human_size(5000 * 1024 - 1), "");
        assert_eq!(human_size(100 << 20), " (100.00 MiB 104.85 MB)");
        assert_eq!(human_size(99000 << 10), " (96.67 MiB 101.37 MB)");
        assert_eq!(human_size(3 << 30), " (3.00 GiB 3.22 GB)");
    }
}
