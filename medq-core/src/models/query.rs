use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle position of a patient query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Processing,
    AwaitingReview,
    Reviewed,
    Completed,
}

impl QueryStatus {
    pub const ALL: [QueryStatus; 5] = [
        QueryStatus::Pending,
        QueryStatus::Processing,
        QueryStatus::AwaitingReview,
        QueryStatus::Reviewed,
        QueryStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Processing => "processing",
            QueryStatus::AwaitingReview => "awaiting_review",
            QueryStatus::Reviewed => "reviewed",
            QueryStatus::Completed => "completed",
        }
    }

    /// Position in the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            QueryStatus::Pending => 0,
            QueryStatus::Processing => 1,
            QueryStatus::AwaitingReview => 2,
            QueryStatus::Reviewed => 3,
            QueryStatus::Completed => 4,
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown query status '{}'", s))
    }
}

/// Triage priority tier, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueryPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl QueryPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPriority::Low => "low",
            QueryPriority::Medium => "medium",
            QueryPriority::High => "high",
            QueryPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for QueryPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(QueryPriority::Low),
            "medium" => Ok(QueryPriority::Medium),
            "high" => Ok(QueryPriority::High),
            "urgent" => Ok(QueryPriority::Urgent),
            other => Err(format!("unknown query priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub content: String,
    pub status: QueryStatus,
    pub priority: QueryPriority,
    /// `None` until the query has been triaged.
    pub safety_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Query {
    /// A freshly submitted query. Every entry point starts here, in `Pending`.
    pub fn new(patient_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            content: content.into(),
            status: QueryStatus::Pending,
            priority: QueryPriority::default(),
            safety_score: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// Filter for listing queries. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilter {
    pub status: Option<QueryStatus>,
    pub patient_id: Option<Uuid>,
    pub priority: Option<QueryPriority>,
    /// Restricts the listing to triaged queries when either bound is set.
    pub min_safety_score: Option<f64>,
    pub max_safety_score: Option<f64>,
    #[serde(default)]
    pub triaged_only: bool,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn matches(&self, query: &Query) -> bool {
        if self.status.is_some_and(|s| s != query.status) {
            return false;
        }
        if self.patient_id.is_some_and(|p| p != query.patient_id) {
            return false;
        }
        if self.priority.is_some_and(|p| p != query.priority) {
            return false;
        }
        let needs_score =
            self.triaged_only || self.min_safety_score.is_some() || self.max_safety_score.is_some();
        match query.safety_score {
            None if needs_score => false,
            None => true,
            Some(score) => {
                self.min_safety_score.map_or(true, |min| score >= min)
                    && self.max_safety_score.map_or(true, |max| score <= max)
            }
        }
    }
}

/// One page of a filtered listing plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}
