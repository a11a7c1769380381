use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

/// Offer accounting for one run; the primary observability signal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Offers in the primary feed.
    pub total: usize,
    pub reference_offers: usize,
    /// Dropped because the reference feed does not carry them.
    pub removed_missing: usize,
    /// Dropped by schema validation.
    pub removed_invalid: usize,
    /// Offers written to the published file.
    pub kept: usize,
    pub price_updates: usize,
    pub other_updates: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub title: String,
    pub output: PathBuf,
    pub counts: RunCounts,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let c = &self.counts;
        format!(
            "{title} feed updated\n\
             Total offers: {total}\n\
             Kept offers: {kept}\n\
             Removed missing in reference feed: {missing}\n\
             Removed invalid for marketplace: {invalid}\n\
             Price updates: {price}\n\
             Old price/availability updates: {other}",
            title = self.title,
            total = c.total,
            kept = c.kept,
            missing = c.removed_missing,
            invalid = c.removed_invalid,
            price = c.price_updates,
            other = c.other_updates,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(error: &str, detail: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            detail: Some(detail.into()),
        }
    }
}
