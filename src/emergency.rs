//! Emergency classification
//!
//! Keyword scan over free text producing a severity tier. Matching is a
//! case-insensitive substring search, so substrings of longer words match
//! too; recall matters more than precision here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::markers::EMERGENCY_MARKER;

/// Severity of a conversational turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyTier {
    /// Nothing alarming
    #[default]
    Normal,
    /// See a doctor today
    Moderate,
    /// Call 108 immediately
    Critical,
}

impl EmergencyTier {
    /// Combine two tiers, never downgrading
    #[must_use]
    pub fn escalate(self, other: Self) -> Self {
        self.max(other)
    }

    /// Whether this tier requires the emergency overlay
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for EmergencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Moderate => write!(f, "moderate"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Critical keywords: standard Telugu, Telangana and Rayalaseema dialects, English
const CRITICAL_KEYWORDS: &[&str] = &[
    // Telugu
    "గుండె నొప్పి",
    "గుండె ఆగిపోయింది",
    "శ్వాస అందడం లేదు",
    "స్పృహ తప్పింది",
    "స్పృహ పోయింది",
    "మూర్ఛ వచ్చింది",
    "రక్తం ఆగడం లేదు",
    "చాలా రక్తం పోతోంది",
    "విషం తిన్నాను",
    "విషం తాగాను",
    "పక్షవాతం",
    "స్ట్రోక్",
    "అపస్మారం",
    "నాలుక పడిపోతోంది",
    "మింగడం కష్టంగా ఉంది",
    // Telangana
    "గుండె సల్లాల్లే ఉంది",
    "ఊపిరి అందడం లేదు",
    // Rayalaseema
    "ప్రాణం పోతాందే",
    "తల తిరుగుతాందే",
    // English
    "heart attack",
    "chest pain",
    "cant breathe",
    "unconscious",
    "stroke",
    "seizure",
    "overdose",
    "severe bleeding",
    "accident",
    "fell down",
    "not breathing",
];

/// Moderate keywords
const MODERATE_KEYWORDS: &[&str] = &[
    "చాలా జ్వరం",
    "103 జ్వరం",
    "104 జ్వరం",
    "వాంతులు ఆగడం లేదు",
    "డయేరియా తీవ్రంగా",
    "తలనొప్పి చాలా తీవ్రంగా",
    "చెవుల్లో శబ్దం",
    "కళ్ళు అస్తమానం తిరుగుతున్నాయి",
    "high fever",
    "severe headache",
    "persistent vomiting",
];

/// Classifies text into an [`EmergencyTier`]
#[derive(Debug, Clone)]
pub struct EmergencyClassifier {
    critical: Vec<String>,
    moderate: Vec<String>,
}

impl Default for EmergencyClassifier {
    fn default() -> Self {
        Self::with_keywords(
            CRITICAL_KEYWORDS.iter().copied(),
            MODERATE_KEYWORDS.iter().copied(),
        )
    }
}

impl EmergencyClassifier {
    /// Create a classifier with the built-in keyword sets
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier from custom keyword sets
    ///
    /// Keywords are trimmed and lowercased. A keyword listed in both sets
    /// is kept only as critical so the sets stay disjoint.
    pub fn with_keywords<'a>(
        critical: impl IntoIterator<Item = &'a str>,
        moderate: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut critical_set: Vec<String> = Vec::new();
        for keyword in critical {
            let normalized = keyword.trim().to_lowercase();
            if !normalized.is_empty() && !critical_set.contains(&normalized) {
                critical_set.push(normalized);
            }
        }

        let mut moderate_set: Vec<String> = Vec::new();
        for keyword in moderate {
            let normalized = keyword.trim().to_lowercase();
            if !normalized.is_empty()
                && !critical_set.contains(&normalized)
                && !moderate_set.contains(&normalized)
            {
                moderate_set.push(normalized);
            }
        }

        tracing::debug!(
            critical = critical_set.len(),
            moderate = moderate_set.len(),
            "emergency classifier initialized"
        );

        Self {
            critical: critical_set,
            moderate: moderate_set,
        }
    }

    /// Classify user text, critical keywords first
    #[must_use]
    pub fn analyze(&self, text: &str) -> EmergencyTier {
        let text = text.to_lowercase();

        if let Some(keyword) = self.critical.iter().find(|k| text.contains(k.as_str())) {
            tracing::warn!(keyword = %keyword, "critical keyword detected");
            return EmergencyTier::Critical;
        }

        if let Some(keyword) = self.moderate.iter().find(|k| text.contains(k.as_str())) {
            tracing::info!(keyword = %keyword, "moderate keyword detected");
            return EmergencyTier::Moderate;
        }

        EmergencyTier::Normal
    }

    /// Classify a finished model reply by its reserved emergency marker
    #[must_use]
    pub fn analyze_output(&self, response: &str) -> EmergencyTier {
        if response.contains(EMERGENCY_MARKER) {
            EmergencyTier::Critical
        } else {
            EmergencyTier::Normal
        }
    }

    /// Critical keyword set
    #[must_use]
    pub fn critical_keywords(&self) -> &[String] {
        &self.critical
    }

    /// Moderate keyword set
    #[must_use]
    pub fn moderate_keywords(&self) -> &[String] {
        &self.moderate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_telugu() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(
            classifier.analyze("నాకు గుండె నొప్పిగా ఉంది"),
            EmergencyTier::Critical
        );
    }

    #[test]
    fn test_dialect_keywords() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(classifier.analyze("ఊపిరి అందడం లేదు రా"), EmergencyTier::Critical);
        assert_eq!(classifier.analyze("అమ్మా ప్రాణం పోతాందే"), EmergencyTier::Critical);
    }

    #[test]
    fn test_critical_takes_precedence() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(
            classifier.analyze("high fever and now CHEST PAIN"),
            EmergencyTier::Critical
        );
        assert_eq!(
            classifier.analyze("చాలా జ్వరం, మూర్ఛ వచ్చింది"),
            EmergencyTier::Critical
        );
    }

    #[test]
    fn test_moderate() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(classifier.analyze("103 జ్వరం ఉంది"), EmergencyTier::Moderate);
        assert_eq!(classifier.analyze("Severe Headache since morning"), EmergencyTier::Moderate);
    }

    #[test]
    fn test_normal_and_garbage() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(classifier.analyze(""), EmergencyTier::Normal);
        assert_eq!(classifier.analyze("   "), EmergencyTier::Normal);
        assert_eq!(classifier.analyze("నాకు జలుబుగా ఉంది"), EmergencyTier::Normal);
        assert_eq!(classifier.analyze("\u{0}\u{1f600}##"), EmergencyTier::Normal);
    }

    #[test]
    fn test_substring_matching_accepts_false_positives() {
        let classifier = EmergencyClassifier::new();
        // "stroke" inside "heatstroke" still counts
        assert_eq!(classifier.analyze("mild heatstroke"), EmergencyTier::Critical);
    }

    #[test]
    fn test_analyze_output_marker() {
        let classifier = EmergencyClassifier::new();
        assert_eq!(
            classifier.analyze_output("వెంటనే 108 కి కాల్ చేయండి! [LAASYA_EMERGENCY_108]"),
            EmergencyTier::Critical
        );
        assert_eq!(
            classifier.analyze_output("[LAASYA_EMERGENCY_108]"),
            EmergencyTier::Critical
        );
        // Keywords alone do not count in model output
        assert_eq!(classifier.analyze_output("chest pain"), EmergencyTier::Normal);
        assert_eq!(
            classifier.analyze_output("[LAASYA_EMERGENCY]"),
            EmergencyTier::Normal
        );
    }

    #[test]
    fn test_custom_sets_stay_disjoint() {
        let classifier =
            EmergencyClassifier::with_keywords(["Fire", " fire ", ""], ["fire", "Smoke"]);
        assert_eq!(classifier.critical_keywords(), &["fire"]);
        assert_eq!(classifier.moderate_keywords(), &["smoke"]);
        assert_eq!(classifier.analyze("smoke and fire"), EmergencyTier::Critical);
    }

    #[test]
    fn test_tier_ordering_and_escalation() {
        assert!(EmergencyTier::Normal < EmergencyTier::Moderate);
        assert!(EmergencyTier::Moderate < EmergencyTier::Critical);
        assert_eq!(
            EmergencyTier::Critical.escalate(EmergencyTier::Normal),
            EmergencyTier::Critical
        );
        assert_eq!(
            EmergencyTier::Normal.escalate(EmergencyTier::Moderate),
            EmergencyTier::Moderate
        );
    }
}
