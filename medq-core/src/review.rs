//! Doctor review gate.
//!
//! The only writer of reviews. A review is accepted when the query exists, is
//! AWAITING_REVIEW, the doctor is known and no review is on file yet, checked
//! in that order. The review and the REVIEWED transition commit together.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{MedqError, Result};
use crate::lifecycle::check_transition;
use crate::models::{Page, QueryStatus, Review, ReviewFilter};
use crate::store::Store;

#[derive(Clone)]
pub struct ReviewGate {
    store: Arc<dyn Store>,
}

/// A doctor's decision as submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInput {
    pub doctor_id: Uuid,
    pub content: String,
    pub approved: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReviewGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn submit_review(&self, query_id: Uuid, input: ReviewInput) -> Result<Review> {
        let query = self
            .store
            .get_query(query_id)
            .await?
            .ok_or_else(|| MedqError::not_found("query", query_id))?;

        // Only AWAITING_REVIEW may move to REVIEWED.
        check_transition(query.status, QueryStatus::Reviewed)?;

        if !self.store.doctor_exists(input.doctor_id).await? {
            return Err(MedqError::not_found("doctor", input.doctor_id));
        }

        if self.store.review_for_query(query_id).await?.is_some() {
            return Err(MedqError::Conflict(format!(
                "query {} has already been reviewed",
                query_id
            )));
        }

        let review = Review {
            id: Uuid::new_v4(),
            query_id,
            doctor_id: input.doctor_id,
            content: input.content,
            approved: input.approved,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
        };

        // The store re-checks status and uniqueness against the locked row.
        self.store
            .commit_review(&review, review.created_at)
            .await
            .map_err(|e| match e {
                MedqError::Database(e) => MedqError::PersistenceFailure(e.to_string()),
                other => other,
            })?;

        tracing::info!(
            query_id = %query_id,
            review_id = %review.id,
            doctor_id = %review.doctor_id,
            approved = review.approved,
            "Review recorded"
        );
        Ok(review)
    }

    pub async fn review_for_query(&self, query_id: Uuid) -> Result<Review> {
        self.store
            .review_for_query(query_id)
            .await?
            .ok_or_else(|| MedqError::not_found("review", query_id))
    }

    pub async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>> {
        self.store.list_reviews(filter).await
    }
}
