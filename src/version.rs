/// The client variants this server can host. Two patch-only variants, two
/// pre-release builds, and ten gameplay releases spanning the family's
/// lifetime. A session's version is fixed once the login handshake has
/// identified the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    PatchA,
    PatchB,
    PreA,
    PreB,
    V1,
    V2,
    PcPre,
    PcV2,
    ConsoleAPre,
    ConsoleA,
    Ep3Pre,
    Ep3,
    ConsoleB,
    Final,
}

impl Version {
    pub const ALL: [Version; 14] = [
        Version::PatchA,
        Version::PatchB,
        Version::PreA,
        Version::PreB,
        Version::V1,
        Version::V2,
        Version::PcPre,
        Version::PcV2,
        Version::ConsoleAPre,
        Version::ConsoleA,
        Version::Ep3Pre,
        Version::Ep3,
        Version::ConsoleB,
        Version::Final,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Version::PatchA => "patch-a",
            Version::PatchB => "patch-b",
            Version::PreA => "pre-a",
            Version::PreB => "pre-b",
            Version::V1 => "v1",
            Version::V2 => "v2",
            Version::PcPre => "pc-pre",
            Version::PcV2 => "pc-v2",
            Version::ConsoleAPre => "console-a-pre",
            Version::ConsoleA => "console-a",
            Version::Ep3Pre => "ep3-pre",
            Version::Ep3 => "ep3",
            Version::ConsoleB => "console-b",
            Version::Final => "final",
        }
    }

    pub fn from_name(name: &str) -> Option<Version> {
        Version::ALL.iter().copied().find(|v| v.name() == name)
    }

    pub fn is_patch(self) -> bool {
        matches!(self, Version::PatchA | Version::PatchB)
    }

    pub fn is_pre_v1(self) -> bool {
        matches!(self, Version::PreA | Version::PreB)
    }

    pub fn is_v1(self) -> bool {
        matches!(self, Version::PreA | Version::PreB | Version::V1)
    }

    pub fn is_v2(self) -> bool {
        matches!(self, Version::V2 | Version::PcPre | Version::PcV2)
    }

    pub fn is_v1_or_v2(self) -> bool {
        self.is_v1() || self.is_v2()
    }

    pub fn is_v3(self) -> bool {
        matches!(
            self,
            Version::ConsoleAPre
                | Version::ConsoleA
                | Version::Ep3Pre
                | Version::Ep3
                | Version::ConsoleB
        )
    }

    pub fn is_v4(self) -> bool {
        matches!(self, Version::Final)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(
            self,
            Version::ConsoleAPre | Version::ConsoleA | Version::Ep3Pre | Version::Ep3
        )
    }

    pub fn is_ep3(self) -> bool {
        matches!(self, Version::Ep3Pre | Version::Ep3)
    }

    /// The first console revision speaks the v2 key schedule even though its
    /// command set is third-generation.
    pub fn uses_v2_encryption(self) -> bool {
        self.is_patch() || self.is_v1() || self.is_v2() || self == Version::ConsoleAPre
    }

    /// PC-family variants put the size field first in the 4-byte header;
    /// console-family variants put the command first.
    pub fn uses_pc_header(self) -> bool {
        matches!(
            self,
            Version::PatchA | Version::PatchB | Version::PcPre | Version::PcV2
        )
    }

    pub fn header_size(self) -> usize {
        if self.is_v4() {
            8
        } else {
            4
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_partition_gameplay_versions() {
        for v in Version::ALL {
            if v.is_patch() {
                continue;
            }
            let generations =
                [v.is_v1(), v.is_v2(), v.is_v3(), v.is_v4()].iter().filter(|&&b| b).count();
            assert_eq!(generations, 1, "{:?} must be in exactly one generation", v);
        }
    }

    #[test]
    fn big_endian_versions_are_third_generation() {
        for v in Version::ALL {
            if v.is_big_endian() {
                assert!(v.is_v3());
            }
        }
    }

    #[test]
    fn name_round_trip() {
        for v in Version::ALL {
            assert_eq!(Version::from_name(v.name()), Some(v));
        }
    }

    #[test]
    fn final_uses_wide_header() {
        assert_eq!(Version::Final.header_size(), 8);
        assert_eq!(Version::V2.header_size(), 4);
        assert!(!Version::Final.uses_pc_header());
        assert!(Version::PcV2.uses_pc_header());
    }
}
