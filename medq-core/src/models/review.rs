use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A doctor's authoritative answer for a query. At most one per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub query_id: Uuid,
    pub doctor_id: Uuid,
    pub content: String,
    pub approved: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    pub doctor_id: Option<Uuid>,
    pub approved: Option<bool>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

impl ReviewFilter {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(super::QueryFilter::DEFAULT_LIMIT)
    }

    pub fn matches(&self, review: &Review) -> bool {
        self.doctor_id.map_or(true, |d| d == review.doctor_id)
            && self.approved.map_or(true, |a| a == review.approved)
    }
}
