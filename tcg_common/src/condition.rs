//! Card condition tiers and their valuation multipliers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical condition of an owned card, best first.
///
/// Each tier is worth 80% of the tier above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Condition {
    #[default]
    #[serde(rename = "Near Mint")]
    NearMint,
    #[serde(rename = "Lightly Played")]
    LightlyPlayed,
    #[serde(rename = "Moderately Played")]
    ModeratelyPlayed,
    #[serde(rename = "Heavily Played")]
    HeavilyPlayed,
    #[serde(rename = "Damaged")]
    Damaged,
}

impl Condition {
    /// Returns the display name (e.g., "Near Mint")
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::NearMint => "Near Mint",
            Condition::LightlyPlayed => "Lightly Played",
            Condition::ModeratelyPlayed => "Moderately Played",
            Condition::HeavilyPlayed => "Heavily Played",
            Condition::Damaged => "Damaged",
        }
    }

    /// Returns the short grading code (e.g., "NM")
    pub fn code(&self) -> &'static str {
        match self {
            Condition::NearMint => "NM",
            Condition::LightlyPlayed => "LP",
            Condition::ModeratelyPlayed => "MP",
            Condition::HeavilyPlayed => "HP",
            Condition::Damaged => "DMG",
        }
    }

    /// Degradation tier, 0 for Near Mint up to 4 for Damaged
    pub fn tier(&self) -> u32 {
        match self {
            Condition::NearMint => 0,
            Condition::LightlyPlayed => 1,
            Condition::ModeratelyPlayed => 2,
            Condition::HeavilyPlayed => 3,
            Condition::Damaged => 4,
        }
    }

    /// Valuation multiplier: 1.0, 0.8, 0.64, 0.512, 0.4096
    pub fn multiplier(&self) -> f64 {
        0.8_f64.powi(self.tier() as i32)
    }

    /// Condition-adjusted price: `max(1, floor(base * multiplier))`.
    ///
    /// Computed as `base * 4^k / 5^k` in integers so the result never depends
    /// on float rounding.
    pub fn apply(&self, base_price: i64) -> i64 {
        let tier = self.tier();
        let numerator = 4_i64.pow(tier);
        let denominator = 5_i64.pow(tier);
        (base_price * numerator / denominator).max(1)
    }

    /// Parse either a display name or a grading code
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().to_lowercase() == normalized || c.code().to_lowercase() == normalized)
    }

    /// All conditions, best first
    pub fn all() -> &'static [Condition] {
        &[
            Condition::NearMint,
            Condition::LightlyPlayed,
            Condition::ModeratelyPlayed,
            Condition::HeavilyPlayed,
            Condition::Damaged,
        ]
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipliers_follow_eighty_percent_steps() {
        let expected = [1.0, 0.8, 0.64, 0.512, 0.4096];
        for (condition, want) in Condition::all().iter().zip(expected) {
            assert!((condition.multiplier() - want).abs() < 1e-9, "{}", condition);
        }
    }

    #[test]
    fn apply_floors_and_never_drops_below_one() {
        assert_eq!(Condition::NearMint.apply(437), 437);
        assert_eq!(Condition::LightlyPlayed.apply(437), 349);
        assert_eq!(Condition::ModeratelyPlayed.apply(437), 279);
        assert_eq!(Condition::HeavilyPlayed.apply(437), 223);
        // 437 * 0.4096 = 178.9952
        assert_eq!(Condition::Damaged.apply(437), 178);
        assert_eq!(Condition::Damaged.apply(1), 1);
        assert_eq!(Condition::HeavilyPlayed.apply(2), 1);
    }

    #[test]
    fn parse_accepts_names_and_codes() {
        assert_eq!(Condition::parse("Near Mint"), Some(Condition::NearMint));
        assert_eq!(Condition::parse("lightly played"), Some(Condition::LightlyPlayed));
        assert_eq!(Condition::parse(" MP "), Some(Condition::ModeratelyPlayed));
        assert_eq!(Condition::parse("dmg"), Some(Condition::Damaged));
        assert_eq!(Condition::parse("Mint"), None);
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&Condition::HeavilyPlayed).unwrap();
        assert_eq!(json, "\"Heavily Played\"");
        let parsed: Condition = serde_json::from_str("\"Damaged\"").unwrap();
        assert_eq!(parsed, Condition::Damaged);
    }
}
