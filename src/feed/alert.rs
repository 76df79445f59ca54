/// Severity tier carried by the feed's `severity` property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SeverityTier {
    /// `Severe`.
    Severe,
    /// `Extreme`.
    Extreme,
}

impl SeverityTier {
    /// Parse the feed's tag. Other tags (`Moderate`, `Minor`, `Unknown`) are not tiers.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Severe" => Some(Self::Severe),
            "Extreme" => Some(Self::Extreme),
            _ => None,
        }
    }
}

/// Severity attached to an alert by the active policy.
///
/// Only used for ordering and highlight color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Integer rank from a priority table; higher is more urgent.
    Rank(u32),
    /// Enumerated tier from the feed.
    Tier(SeverityTier),
}

impl Severity {
    /// Ordering key; higher sorts first.
    pub fn sort_key(self) -> u32 {
        match self {
            Self::Rank(r) => r,
            Self::Tier(SeverityTier::Severe) => 1,
            Self::Tier(SeverityTier::Extreme) => 2,
        }
    }
}

/// One active weather event.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Alert {
    /// Event category, e.g. `Tornado Warning`.
    pub event: String,
    /// Free-text description of the affected area.
    pub area: String,
    /// Rank or tier assigned by the filter policy.
    pub severity: Severity,
}

impl Alert {
    /// Convenience constructor for ranked alerts.
    pub fn ranked(event: impl Into<String>, area: impl Into<String>, rank: u32) -> Self {
        Self {
            event: event.into(),
            area: area.into(),
            severity: Severity::Rank(rank),
        }
    }

    /// `"event - area"` as shown in the crawl.
    pub fn crawl_entry(&self) -> String {
        format!("{} - {}", self.event, self.area)
    }
}
