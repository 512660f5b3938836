use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Draft response produced with the help of the language model. One per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub query_id: Uuid,
    pub content: String,
    pub model_used: String,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn new(
        query_id: Uuid,
        content: impl Into<String>,
        model_used: impl Into<String>,
        confidence_score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_id,
            content: content.into(),
            model_used: model_used.into(),
            confidence_score,
            created_at: Utc::now(),
        }
    }

    /// A stored suggestion is reusable only if it carries content.
    pub fn is_usable(&self) -> bool {
        !self.content.trim().is_empty()
    }
}
