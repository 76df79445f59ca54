use crate::feed::alert::Alert;
use crate::feed::policy::SeverityPolicy;
use crate::foundation::error::{AlertcastError, AlertcastResult};

#[derive(Debug, serde::Deserialize)]
struct FeedDoc {
    features: Vec<Feature>,
}

#[derive(Debug, serde::Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Properties {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default, rename = "areaDesc")]
    area_desc: Option<String>,
}

/// One feed entry before filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAlert {
    /// Event name.
    pub event: String,
    /// Severity tag (`Severe`, `Extreme`, ...), if present.
    pub severity_tag: Option<String>,
    /// Affected area description (empty when absent).
    pub area: String,
}

/// Decode a GeoJSON alert feed and select the alerts the policy keeps.
///
/// A document without a `features` array is malformed. Features without an `event` are skipped.
pub fn parse_feed(bytes: &[u8], policy: &dyn SeverityPolicy) -> AlertcastResult<Vec<Alert>> {
    let doc: FeedDoc = serde_json::from_slice(bytes)
        .map_err(|e| AlertcastError::fetch(format!("malformed alert feed: {e}")))?;

    let raw = doc.features.into_iter().filter_map(|f| {
        let p = f.properties;
        let event = p.event.filter(|e| !e.trim().is_empty())?;
        Some(RawAlert {
            event,
            severity_tag: p.severity,
            area: p.area_desc.unwrap_or_default(),
        })
    });
    Ok(select_alerts(raw, policy))
}

/// Filter, deduplicate and order raw feed entries.
///
/// Entries the policy rejects are dropped. Duplicate `(event, area)` pairs keep the first
/// occurrence. The result is sorted by descending severity; ties keep feed order.
pub fn select_alerts(
    raw: impl IntoIterator<Item = RawAlert>,
    policy: &dyn SeverityPolicy,
) -> Vec<Alert> {
    let mut out: Vec<Alert> = Vec::new();
    for r in raw {
        let Some(severity) = policy.classify(&r.event, r.severity_tag.as_deref()) else {
            continue;
        };
        if out.iter().any(|a| a.event == r.event && a.area == r.area) {
            continue;
        }
        out.push(Alert {
            event: r.event,
            area: r.area,
            severity,
        });
    }
    // `sort_by` is stable.
    out.sort_by(|a, b| b.severity.sort_key().cmp(&a.severity.sort_key()));
    out
}

#[cfg(test)]
#[path = "../../tests/unit/feed/parse.rs"]
mod tests;
