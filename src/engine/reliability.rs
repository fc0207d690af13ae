use serde::Serialize;

use super::error::{EngineError, EngineResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReliabilityTier {
    Indicative,
    Preliminary,
    Practical,
    Standard,
    HighPrecision,
}

impl ReliabilityTier {
    pub fn classify(execution_count: usize) -> EngineResult<Self> {
        match execution_count {
            0 | 1 => Err(EngineError::insufficient("reliability_tier", 2, execution_count)),
            2 => Ok(Self::Indicative),
            3..=4 => Ok(Self::Preliminary),
            5..=9 => Ok(Self::Practical),
            10..=19 => Ok(Self::Standard),
            _ => Ok(Self::HighPrecision),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indicative => "indicative",
            Self::Preliminary => "preliminary",
            Self::Practical => "practical",
            Self::Standard => "standard",
            Self::HighPrecision => "high-precision",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_are_exact() {
        let cases = [
            (2, ReliabilityTier::Indicative),
            (3, ReliabilityTier::Preliminary),
            (4, ReliabilityTier::Preliminary),
            (5, ReliabilityTier::Practical),
            (9, ReliabilityTier::Practical),
            (10, ReliabilityTier::Standard),
            (19, ReliabilityTier::Standard),
            (20, ReliabilityTier::HighPrecision),
            (500, ReliabilityTier::HighPrecision),
        ];
        for (count, expected) in cases {
            assert_eq!(
                ReliabilityTier::classify(count).expect("tier should resolve"),
                expected,
                "count {count}"
            );
        }
    }

    #[test]
    fn counts_below_two_have_no_tier() {
        assert!(ReliabilityTier::classify(0).is_err());
        assert!(matches!(
            ReliabilityTier::classify(1),
            Err(EngineError::InsufficientData { required: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn tiers_serialize_with_hyphenated_labels() {
        let json = serde_json::to_value(ReliabilityTier::HighPrecision).expect("serialize");
        assert_eq!(json, serde_json::json!("high-precision"));
        assert_eq!(ReliabilityTier::HighPrecision.as_str(), "high-precision");
    }
}
