use serde::Serialize;
use std::fmt;

/// NVIDIA architecture family, as far as media transcoding cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Blackwell,
    AdaLovelace,
    Ampere,
    Turing,
    Volta,
    Pascal,
    Maxwell,
    Unknown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Blackwell => "Blackwell",
            Tier::AdaLovelace => "Ada Lovelace",
            Tier::Ampere => "Ampere",
            Tier::Turing => "Turing",
            Tier::Volta => "Volta",
            Tier::Pascal => "Pascal",
            Tier::Maxwell => "Maxwell",
            Tier::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierRule {
    /// Lowercase substring of the `nvidia-smi` device name
    pub pattern: &'static str,
    pub tier: Tier,
    pub notes: &'static str,
}

const fn rule(pattern: &'static str, tier: Tier, notes: &'static str) -> ClassifierRule {
    ClassifierRule { pattern, tier, notes }
}

const BLACKWELL: &str = "9th gen NVENC: AV1/HEVC/H.264 encode incl. 4:2:2, AV1 decode";
const ADA: &str = "8th gen NVENC: AV1 encode, dual encoders on high-end parts";
const AMPERE: &str = "7th gen NVENC (Turing encoder): HEVC B-frames, AV1 decode";
const TURING: &str = "7th gen NVENC: HEVC B-frames, best pre-AV1 quality";
const VOLTA: &str = "6th gen NVENC: HEVC 10-bit encode";
const PASCAL: &str = "6th gen NVENC: HEVC 10-bit encode, no B-frames";
const MAXWELL: &str = "5th gen NVENC: H.264 and HEVC 8-bit encode only";

/// Newest families first; the first matching rule wins. Professional names
/// ("RTX 5000 Ada") come before the consumer prefixes they would otherwise
/// collide with.
pub const RULES: &[ClassifierRule] = &[
    rule("blackwell", Tier::Blackwell, BLACKWELL),
    rule("geforce rtx 50", Tier::Blackwell, BLACKWELL),
    rule("b200", Tier::Blackwell, BLACKWELL),
    rule("ada generation", Tier::AdaLovelace, ADA),
    rule("geforce rtx 40", Tier::AdaLovelace, ADA),
    rule("l40", Tier::AdaLovelace, ADA),
    rule(" l4", Tier::AdaLovelace, ADA),
    rule("geforce rtx 30", Tier::Ampere, AMPERE),
    rule("rtx a", Tier::Ampere, AMPERE),
    rule(" a10", Tier::Ampere, AMPERE),
    rule(" a16", Tier::Ampere, AMPERE),
    rule(" a2", Tier::Ampere, AMPERE),
    rule(" a30", Tier::Ampere, AMPERE),
    rule(" a40", Tier::Ampere, AMPERE),
    rule("geforce rtx 20", Tier::Turing, TURING),
    rule("geforce gtx 16", Tier::Turing, TURING),
    rule("quadro rtx", Tier::Turing, TURING),
    rule("tesla t4", Tier::Turing, TURING),
    rule(" t400", Tier::Turing, TURING),
    rule(" t600", Tier::Turing, TURING),
    rule(" t1000", Tier::Turing, TURING),
    rule("titan v", Tier::Volta, VOLTA),
    rule("v100", Tier::Volta, VOLTA),
    rule("geforce gtx 10", Tier::Pascal, PASCAL),
    rule("titan x", Tier::Pascal, PASCAL),
    rule("quadro p", Tier::Pascal, PASCAL),
    rule("tesla p", Tier::Pascal, PASCAL),
    rule("geforce gtx 9", Tier::Maxwell, MAXWELL),
    rule("quadro m", Tier::Maxwell, MAXWELL),
    rule("tesla m", Tier::Maxwell, MAXWELL),
];

pub fn classify(device_name: &str) -> Option<&'static ClassifierRule> {
    classify_with(RULES, device_name)
}

pub fn classify_with(rules: &'static [ClassifierRule], device_name: &str) -> Option<&'static ClassifierRule> {
    let name = format!(" {}", device_name.to_lowercase());
    rules.iter().find(|r| name.contains(r.pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("NVIDIA GeForce RTX 5090", Tier::Blackwell)]
    #[test_case("NVIDIA RTX 5000 Ada Generation", Tier::AdaLovelace)]
    #[test_case("NVIDIA RTX 2000 Ada Generation", Tier::AdaLovelace)]
    #[test_case("NVIDIA GeForce RTX 4060 Ti", Tier::AdaLovelace)]
    #[test_case("NVIDIA L4", Tier::AdaLovelace)]
    #[test_case("NVIDIA GeForce RTX 3060", Tier::Ampere)]
    #[test_case("NVIDIA RTX A2000 12GB", Tier::Ampere)]
    #[test_case("NVIDIA A100-SXM4-40GB", Tier::Ampere)]
    #[test_case("NVIDIA T400 4GB", Tier::Turing)]
    #[test_case("Tesla T4", Tier::Turing)]
    #[test_case("NVIDIA GeForce GTX 1660 SUPER", Tier::Turing)]
    #[test_case("Quadro RTX 4000", Tier::Turing)]
    #[test_case("NVIDIA GeForce GTX 1080 Ti", Tier::Pascal)]
    #[test_case("Quadro P2000", Tier::Pascal)]
    #[test_case("NVIDIA GeForce GTX 970", Tier::Maxwell)]
    fn known_devices(name: &str, expected: Tier) {
        assert_eq!(classify(name).map(|r| r.tier), Some(expected));
    }

    #[test]
    fn match_is_case_insensitive() {
        assert_eq!(classify("nvidia geforce rtx 4090").map(|r| r.tier), Some(Tier::AdaLovelace));
    }

    #[test]
    fn unknown_device_has_no_rule() {
        assert!(classify("Matrox G200eR2").is_none());
        assert!(classify("").is_none());
    }

    #[test]
    fn first_match_wins() {
        static OVERLAPPING: &[ClassifierRule] = &[
            rule("rtx", Tier::Turing, "first"),
            rule("rtx 40", Tier::AdaLovelace, "second"),
        ];
        let hit = classify_with(OVERLAPPING, "GeForce RTX 4090").unwrap();
        assert_eq!(hit.notes, "first");
    }
}
