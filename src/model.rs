use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier of one store partition. Items from different sources are
/// merged at selection time but graded against their originating source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One learnable entry as read from the external store. The engine holds
/// transient copies only; the store remains the owner of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: String,
    pub source_id: SourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub review_count: u32,
    pub next_review_date: Option<NaiveDate>,
    pub last_reviewed_date: Option<NaiveDate>,
    pub date_added: NaiveDate,
    pub mastered: bool,
}

impl ReviewItem {
    /// An item that has never been graded. New items carry no due date and
    /// compete in the same priority band as due items.
    pub fn is_new(&self) -> bool {
        self.next_review_date.is_none()
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_review_date.map(|d| d <= today).unwrap_or(false)
    }

    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        self.review_count = patch.review_count;
        self.next_review_date = Some(patch.next_review_date);
        self.last_reviewed_date = Some(patch.last_reviewed_date);
        self.mastered = patch.mastered;
    }
}

/// Query filter understood by every source. Stores that cannot filter
/// server-side may return a superset; the selector re-filters client-side.
#[derive(Debug, Clone, Copy)]
pub struct ItemFilter {
    pub due_or_new: bool,
    pub exclude_mastered: bool,
    pub today: NaiveDate,
}

impl ItemFilter {
    pub fn due_or_new(today: NaiveDate) -> Self {
        Self {
            due_or_new: true,
            exclude_mastered: true,
            today,
        }
    }

    pub fn all(today: NaiveDate) -> Self {
        Self {
            due_or_new: false,
            exclude_mastered: false,
            today,
        }
    }

    pub fn matches(&self, item: &ReviewItem) -> bool {
        if self.exclude_mastered && item.mastered {
            return false;
        }
        if self.due_or_new && !item.is_new() && !item.is_due(self.today) {
            return false;
        }
        true
    }
}

/// Scheduling fields written back by one grading transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub review_count: u32,
    pub next_review_date: NaiveDate,
    pub last_reviewed_date: NaiveDate,
    pub mastered: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub item: ReviewItem,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub source_id: SourceId,
    pub error: String,
}

/// Outcome of one batch selection. `failed_sources` lists sources that were
/// excluded after exhausting retries; the item list is still valid for the
/// sources that responded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub failed_sources: Vec<SourceFailure>,
}

impl BatchResult {
    pub fn is_partial(&self) -> bool {
        !self.failed_sources.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueStats {
    pub overdue: u64,
    pub due_today: u64,
    pub new_items: u64,
    pub mastered: u64,
    pub total: u64,
}
