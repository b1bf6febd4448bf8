use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User/asset risk tier. Ordering matters: Low < Moderate < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Moderate => "moderate",
            RiskTier::High => "high",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskTier::Low),
            "moderate" => Ok(RiskTier::Moderate),
            "high" => Ok(RiskTier::High),
            other => bail!("invalid risk tier: {other:?} (expected low/moderate/high)"),
        }
    }

    /// Users may see assets at or below their own tolerance.
    pub fn allows(&self, asset_tier: RiskTier) -> bool {
        asset_tier <= *self
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a questionnaire score into a tier.
///
/// An empty question bank yields max_score = 0; that is treated as pct = 0,
/// not a division error.
pub fn classify_score(total_score: i32, max_score: i32) -> RiskTier {
    let pct = if max_score > 0 {
        f64::from(total_score) / f64::from(max_score)
    } else {
        0.0
    };
    if pct < 0.4 {
        RiskTier::Low
    } else if pct < 0.7 {
        RiskTier::Moderate
    } else {
        RiskTier::High
    }
}

/// Pick the effective tier for a recommendation request.
///
/// Priority: explicit query parameter, then request body, then the user's
/// stored profile. Fails when nothing resolves to a valid tier.
pub fn resolve_effective_tier(
    explicit: Option<&str>,
    body: Option<&str>,
    stored_profile: Option<&str>,
) -> anyhow::Result<RiskTier> {
    let Some(candidate) = explicit.or(body).or(stored_profile) else {
        bail!("no risk tier available: pass one explicitly or submit the questionnaire first");
    };
    RiskTier::parse(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_is_low_moderate_high() {
        assert!(RiskTier::Low < RiskTier::Moderate);
        assert!(RiskTier::Moderate < RiskTier::High);
    }

    #[test]
    fn classify_score_boundaries_are_exact() {
        // pct thresholds: <0.4 low, <0.7 moderate, else high.
        assert_eq!(classify_score(39, 100), RiskTier::Low);
        assert_eq!(classify_score(40, 100), RiskTier::Moderate);
        assert_eq!(classify_score(69, 100), RiskTier::Moderate);
        assert_eq!(classify_score(70, 100), RiskTier::High);
    }

    #[test]
    fn classify_score_guards_empty_bank() {
        assert_eq!(classify_score(0, 0), RiskTier::Low);
    }

    #[test]
    fn eligibility_is_monotone_in_user_tier() {
        let assets = [RiskTier::Low, RiskTier::Moderate, RiskTier::High];
        for asset in assets {
            if RiskTier::Low.allows(asset) {
                assert!(RiskTier::Moderate.allows(asset));
            }
            assert!(RiskTier::High.allows(asset));
        }
        assert!(RiskTier::Low.allows(RiskTier::Low));
        assert!(!RiskTier::Low.allows(RiskTier::Moderate));
        assert!(RiskTier::Moderate.allows(RiskTier::Moderate));
        assert!(!RiskTier::Moderate.allows(RiskTier::High));
    }

    #[test]
    fn parse_accepts_case_insensitive_names() {
        assert_eq!(RiskTier::parse("Low").unwrap(), RiskTier::Low);
        assert_eq!(RiskTier::parse(" moderate ").unwrap(), RiskTier::Moderate);
        assert!(RiskTier::parse("aggressive").is_err());
    }

    #[test]
    fn effective_tier_prefers_explicit_over_body_over_stored() {
        let t = resolve_effective_tier(Some("high"), Some("low"), Some("moderate")).unwrap();
        assert_eq!(t, RiskTier::High);

        let t = resolve_effective_tier(None, Some("low"), Some("moderate")).unwrap();
        assert_eq!(t, RiskTier::Low);

        let t = resolve_effective_tier(None, None, Some("moderate")).unwrap();
        assert_eq!(t, RiskTier::Moderate);

        assert!(resolve_effective_tier(None, None, None).is_err());
        // An invalid explicit value is an error, not a fall-through.
        assert!(resolve_effective_tier(Some("bogus"), None, Some("low")).is_err());
    }
}
