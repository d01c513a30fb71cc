use serde::{de::Error, Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumString};

/// RAID personalities that can be used to create an array.
///
/// Names follow the md driver; the kernel number is what gets written to the
/// superblock and passed to `SET_ARRAY_INFO`.
#[derive(Serialize, Copy, Clone, Debug, Hash, Eq, PartialEq, Display, EnumString)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
#[serde(rename_all = "kebab-case")]
#[strum(ascii_case_insensitive)]
pub enum RaidLevel {
    /// # Concatenation
    #[strum(to_string = "linear", serialize = "-1")]
    Linear,

    /// # Striping
    #[strum(to_string = "raid0", serialize = "0", serialize = "stripe")]
    Raid0,

    /// # Mirroring
    #[strum(to_string = "raid1", serialize = "1", serialize = "mirror")]
    Raid1,

    /// # Striping with dedicated parity
    #[strum(to_string = "raid4", serialize = "4")]
    Raid4,

    /// # Striping with distributed parity
    #[strum(to_string = "raid5", serialize = "5")]
    Raid5,
}

impl RaidLevel {
    /// Level number as understood by the md driver.
    pub const fn number(self) -> i32 {
        match self {
            RaidLevel::Linear => -1,
            RaidLevel::Raid0 => 0,
            RaidLevel::Raid1 => 1,
            RaidLevel::Raid4 => 4,
            RaidLevel::Raid5 => 5,
        }
    }

    pub const fn from_number(number: i32) -> Option<Self> {
        match number {
            -1 => Some(RaidLevel::Linear),
            0 => Some(RaidLevel::Raid0),
            1 => Some(RaidLevel::Raid1),
            4 => Some(RaidLevel::Raid4),
            5 => Some(RaidLevel::Raid5),
            _ => None,
        }
    }

    /// Whether the level keeps parity, which requires at least two raid disks.
    pub const fn has_parity(self) -> bool {
        self.number() >= 4
    }

    /// Whether the level keeps any redundant copy of the data.
    pub const fn has_redundancy(self) -> bool {
        self.number() >= 1
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrNumber {
    Number(i32),
    Name(String),
}

impl<'de> Deserialize<'de> for RaidLevel {
    fn deserialize<D>(deserializer: D) -> Result<RaidLevel, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Number(n) => RaidLevel::from_number(n)
                .ok_or_else(|| D::Error::custom(format!("unsupported RAID level: {n}"))),
            NameOrNumber::Name(name) => name
                .parse()
                .map_err(|_| D::Error::custom(format!("unsupported RAID level: {name}"))),
        }
    }
}

/// Parity placement algorithms for RAID-5.
#[derive(Serialize, Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Display, EnumString)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
#[serde(rename_all = "kebab-case")]
#[strum(ascii_case_insensitive)]
pub enum Raid5Layout {
    #[strum(to_string = "left-asymmetric", serialize = "la")]
    LeftAsymmetric,

    #[strum(to_string = "right-asymmetric", serialize = "ra")]
    RightAsymmetric,

    /// The md driver's preferred layout, also reachable through the symbolic
    /// name `default`.
    #[default]
    #[strum(to_string = "left-symmetric", serialize = "ls", serialize = "default")]
    LeftSymmetric,

    #[strum(to_string = "right-symmetric", serialize = "rs")]
    RightSymmetric,
}

impl Raid5Layout {
    pub const fn number(self) -> u32 {
        match self {
            Raid5Layout::LeftAsymmetric => 0,
            Raid5Layout::RightAsymmetric => 1,
            Raid5Layout::LeftSymmetric => 2,
            Raid5Layout::RightSymmetric => 3,
        }
    }

    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            0 => Some(Raid5Layout::LeftAsymmetric),
            1 => Some(Raid5Layout::RightAsymmetric),
            2 => Some(Raid5Layout::LeftSymmetric),
            3 => Some(Raid5Layout::RightSymmetric),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Raid5Layout {
    fn deserialize<D>(deserializer: D) -> Result<Raid5Layout, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Number(n) => u32::try_from(n)
                .ok()
                .and_then(Raid5Layout::from_number)
                .ok_or_else(|| D::Error::custom(format!("unknown RAID-5 layout: {n}"))),
            NameOrNumber::Name(name) => name
                .parse()
                .map_err(|_| D::Error::custom(format!("unknown RAID-5 layout: {name}"))),
        }
    }
}
