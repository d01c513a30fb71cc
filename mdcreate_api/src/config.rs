use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use sysdefs::raid::{Raid5Layout, RaidLevel};

use crate::{
    constants::MISSING_MEMBER,
    error::{MdError, PreconditionError, ReportError},
    primitives::size::KibCount,
};

/// Everything needed to create one array.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ArrayCreateRequest {
    /// Path of the md device to configure, for instance `/dev/md0`.
    pub target: PathBuf,

    /// RAID level of the new array. There is no default level.
    #[serde(default)]
    pub level: Option<RaidLevel>,

    /// Parity layout; only meaningful for raid5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Raid5Layout>,

    /// Chunk size. Zero selects the default chunk size.
    #[serde(default)]
    pub chunk: KibCount,

    /// Space used on each member. Zero selects the smallest member's
    /// usable capacity.
    #[serde(default)]
    pub size: KibCount,

    /// Number of active slots.
    pub raid_disks: usize,

    /// Number of spare slots.
    #[serde(default)]
    pub spare_disks: usize,

    /// Members in slot order. `missing` reserves a slot with no device.
    pub members: Vec<MemberSpec>,

    /// What to do once the array is configured, or when warnings come up.
    #[serde(default)]
    pub run: RunPolicy,

    /// Report chosen defaults.
    #[serde(default)]
    pub verbose: bool,

    /// Ignore warnings and skip the raid5 rebuild optimization.
    #[serde(default)]
    pub force: bool,
}

impl ArrayCreateRequest {
    /// Total slots described by the request.
    pub fn slots(&self) -> usize {
        self.raid_disks + self.spare_disks
    }

    /// Loads a request from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MdError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).structured(PreconditionError::LoadRequest {
                path: path.display().to_string(),
            })?;

        serde_yaml::from_str(&contents).structured(PreconditionError::ParseRequest {
            path: path.display().to_string(),
        })
    }
}

/// One entry of the member list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum MemberSpec {
    /// A block device (or image file) backing the slot.
    Device(PathBuf),

    /// A slot reserved without a backing device.
    Missing,
}

impl MemberSpec {
    pub fn path(&self) -> Option<&Path> {
        match self {
            MemberSpec::Device(path) => Some(path),
            MemberSpec::Missing => None,
        }
    }
}

impl From<String> for MemberSpec {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case(MISSING_MEMBER) {
            MemberSpec::Missing
        } else {
            MemberSpec::Device(value.into())
        }
    }
}

impl From<MemberSpec> for String {
    fn from(value: MemberSpec) -> Self {
        value.to_string()
    }
}

impl FromStr for MemberSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MemberSpec::from(s.to_owned()))
    }
}

impl Display for MemberSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberSpec::Device(path) => write!(f, "{}", path.display()),
            MemberSpec::Missing => f.write_str(MISSING_MEMBER),
        }
    }
}

/// Whether to start the array and how to treat warnings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RunPolicy {
    /// Never prompt. Warnings abort unless `force` is set; the array is
    /// started when enough members are present.
    Auto,

    /// Proceed past warnings and always start the array.
    ForceRun,

    /// Ask before proceeding past warnings; the array is started when enough
    /// members are present.
    #[default]
    Interactive,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_member_spec_missing() {
        assert_eq!(MemberSpec::from_str("missing").unwrap(), MemberSpec::Missing);
        assert_eq!(MemberSpec::from_str("MISSING").unwrap(), MemberSpec::Missing);
        assert_eq!(
            MemberSpec::from_str("/dev/sdb1").unwrap(),
            MemberSpec::Device("/dev/sdb1".into())
        );
        assert_eq!(MemberSpec::Missing.to_string(), "missing");
        assert!(MemberSpec::Missing.path().is_none());
    }

    #[test]
    fn test_request_from_yaml() {
        let request: ArrayCreateRequest = serde_yaml::from_str(indoc! {r#"
            target: /dev/md0
            level: raid5
            chunk: 128K
            raid-disks: 3
            spare-disks: 1
            members:
              - /dev/sdb1
              - missing
              - /dev/sdc1
              - /dev/sdd1
            run: force-run
        "#})
        .unwrap();

        assert_eq!(request.target, PathBuf::from("/dev/md0"));
        assert_eq!(request.level, Some(RaidLevel::Raid5));
        assert_eq!(request.layout, None);
        assert_eq!(request.chunk, KibCount(128));
        assert!(request.size.is_unset());
        assert_eq!(request.slots(), 4);
        assert_eq!(request.members[1], MemberSpec::Missing);
        assert_eq!(request.run, RunPolicy::ForceRun);
        assert!(!request.force);
    }

    #[test]
    fn test_request_defaults_and_numeric_level() {
        let request: ArrayCreateRequest = serde_yaml::from_str(indoc! {r#"
            target: /dev/md1
            level: 1
            layout: ls
            raid-disks: 2
            members: [/dev/sdb1, /dev/sdc1]
        "#})
        .unwrap();

        assert_eq!(request.level, Some(RaidLevel::Raid1));
        assert_eq!(request.layout, Some(Raid5Layout::LeftSymmetric));
        assert_eq!(request.run, RunPolicy::Interactive);
        assert_eq!(request.spare_disks, 0);
    }

    #[test]
    fn test_request_rejects_unknown_fields() {
        serde_yaml::from_str::<ArrayCreateRequest>(indoc! {r#"
            target: /dev/md0
            raid-disks: 2
            members: []
            metadata: "1.2"
        "#})
        .unwrap_err();
    }

    #[test]
    fn test_request_round_trip() {
        let request = ArrayCreateRequest {
            target: "/dev/md0".into(),
            level: Some(RaidLevel::Raid0),
            layout: None,
            chunk: KibCount(0),
            size: KibCount(1024),
            raid_disks: 2,
            spare_disks: 0,
            members: vec![MemberSpec::Device("/dev/sdb".into()), MemberSpec::Missing],
            run: RunPolicy::Auto,
            verbose: true,
            force: false,
        };
        let yaml = serde_yaml::to_string(&request).unwrap();
        assert!(yaml.contains("- missing"));
        assert_eq!(
            serde_yaml::from_str::<ArrayCreateRequest>(&yaml).unwrap(),
            request
        );
    }

    #[test]
    fn test_request_from_file() {
        let error = ArrayCreateRequest::from_file("/non-existent/array.yaml").unwrap_err();
        assert_eq!(
            error.kind().to_string(),
            "Failed to load array request from '/non-existent/array.yaml'"
        );
    }
}
