use crate::feed::alert::{Severity, SeverityTier};
use crate::foundation::error::{AlertcastError, AlertcastResult};

/// Decides which feed events become alerts and how urgent they are.
///
/// Returning `None` drops the event before it reaches the rest of the pipeline.
pub trait SeverityPolicy: Send + Sync {
    /// Stable policy name, reported in logs and `describe()` output.
    fn name(&self) -> &'static str;

    /// Classify one feed entry by event name and optional severity tag.
    fn classify(&self, event: &str, severity_tag: Option<&str>) -> Option<Severity>;
}

/// Which built-in policy to construct.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Keep only events listed in the priority table.
    #[default]
    Priority,
    /// Keep only events tagged `Severe` or `Extreme`.
    Tier,
}

impl FilterPolicy {
    /// Build the policy with its default parameters.
    pub fn build(self) -> Box<dyn SeverityPolicy> {
        match self {
            Self::Priority => Box::new(PriorityTable::default()),
            Self::Tier => Box::new(SeverityTierFilter),
        }
    }
}

/// Fixed event-name to rank table.
#[derive(Clone, Debug)]
pub struct PriorityTable {
    entries: Vec<(String, u32)>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            entries: [
                ("Tornado Emergency", 100),
                ("Tornado Warning", 95),
                ("Severe Thunderstorm Warning", 80),
                ("Flash Flood Warning", 75),
                ("Tornado Watch", 60),
                ("Severe Thunderstorm Watch", 50),
            ]
            .into_iter()
            .map(|(e, r)| (e.to_string(), r))
            .collect(),
        }
    }
}

impl PriorityTable {
    /// Build a custom table. Event names must be non-empty and unique.
    pub fn new(entries: impl IntoIterator<Item = (String, u32)>) -> AlertcastResult<Self> {
        let entries: Vec<(String, u32)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(AlertcastError::validation(
                "priority table must contain at least one event",
            ));
        }
        for (i, (event, _)) in entries.iter().enumerate() {
            if event.trim().is_empty() {
                return Err(AlertcastError::validation(
                    "priority table event names must be non-empty",
                ));
            }
            if entries[..i].iter().any(|(e, _)| e == event) {
                return Err(AlertcastError::validation(format!(
                    "priority table lists '{event}' more than once"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Rank for `event`, if listed.
    pub fn rank(&self, event: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(e, _)| e == event)
            .map(|(_, r)| *r)
    }
}

impl SeverityPolicy for PriorityTable {
    fn name(&self) -> &'static str {
        "priority-table"
    }

    fn classify(&self, event: &str, _severity_tag: Option<&str>) -> Option<Severity> {
        self.rank(event).map(Severity::Rank)
    }
}

/// Keeps events whose severity tag is `Severe` or `Extreme`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeverityTierFilter;

impl SeverityPolicy for SeverityTierFilter {
    fn name(&self) -> &'static str {
        "severity-tier"
    }

    fn classify(&self, _event: &str, severity_tag: Option<&str>) -> Option<Severity> {
        severity_tag
            .and_then(SeverityTier::from_tag)
            .map(Severity::Tier)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/feed/policy.rs"]
mod tests;
