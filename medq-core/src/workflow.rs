//! Query workflow: submission, triage, manual overrides and housekeeping.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MedqError, Result};
use crate::models::{
    Doctor, Page, Patient, Query, QueryDocument, QueryFilter, QueryPriority, QueryStatus,
    Suggestion,
};
use crate::store::Store;
use crate::triage::{self, Triage};

/// Fixed ids of the demo identities, so local clients can refer to them.
pub const DEMO_PATIENT_ID: Uuid = Uuid::from_u128(1);
pub const DEMO_DOCTOR_ID: Uuid = Uuid::from_u128(2);

/// Result of triaging a stored query.
#[derive(Debug, Clone, Serialize)]
pub struct TriageOutcome {
    pub query: Query,
    pub triage: Triage,
    pub escalate: bool,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn Store>,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a PENDING, untriaged query for a known patient.
    pub async fn submit_query(&self, patient_id: Uuid, content: &str) -> Result<Query> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MedqError::InvalidInput("query content is empty".into()));
        }
        if !self.store.patient_exists(patient_id).await? {
            return Err(MedqError::not_found("patient", patient_id));
        }

        let query = Query::new(patient_id, content);
        self.store.insert_query(&query).await?;

        tracing::info!(query_id = %query.id, patient_id = %patient_id, "Query submitted");
        Ok(query)
    }

    pub async fn get_query(&self, id: Uuid) -> Result<Query> {
        self.store
            .get_query(id)
            .await?
            .ok_or_else(|| MedqError::not_found("query", id))
    }

    /// Classify the query text, record priority and safety score, and move it
    /// to AWAITING_REVIEW.
    pub async fn triage_query(&self, id: Uuid) -> Result<TriageOutcome> {
        let query = self.get_query(id).await?;
        let triage = triage::classify(&query.content);

        // The store re-checks the status it holds, not the one read above.
        let query = self.store.apply_triage(id, &triage, Utc::now()).await?;

        let escalate = triage.should_escalate();
        if escalate {
            tracing::warn!(
                query_id = %id,
                priority = %triage.priority,
                safety_score = triage.safety_score,
                "Query escalated"
            );
        } else {
            tracing::info!(
                query_id = %id,
                priority = %triage.priority,
                safety_score = triage.safety_score,
                "Query triaged"
            );
        }

        Ok(TriageOutcome {
            query,
            triage,
            escalate,
        })
    }

    /// Manual priority override. Status is left alone.
    pub async fn update_priority(&self, id: Uuid, priority: QueryPriority) -> Result<Query> {
        let query = self.store.set_priority(id, priority, Utc::now()).await?;

        tracing::info!(query_id = %id, priority = %priority, "Priority overridden");
        Ok(query)
    }

    pub async fn update_status(&self, id: Uuid, status: QueryStatus) -> Result<Query> {
        let query = self.store.transition_query(id, status, Utc::now()).await?;

        tracing::info!(query_id = %id, to = %status, "Status updated");
        Ok(query)
    }

    pub async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>> {
        if let (Some(min), Some(max)) = (filter.min_safety_score, filter.max_safety_score) {
            if min > max {
                return Err(MedqError::InvalidInput(format!(
                    "min_safety_score {} exceeds max_safety_score {}",
                    min, max
                )));
            }
        }
        self.store.list_queries(filter).await
    }

    /// Validate and record an attached document. Only its extracted text is kept.
    pub async fn attach_document(
        &self,
        query_id: Uuid,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
        text_content: Option<String>,
    ) -> Result<QueryDocument> {
        // Existence first so an unknown query is reported as such.
        self.get_query(query_id).await?;

        let document =
            QueryDocument::new(query_id, filename, content_type, size_bytes, text_content)?;
        self.store.insert_document(&document).await?;

        tracing::info!(
            query_id = %query_id,
            document_id = %document.id,
            filename = %document.filename,
            size_bytes,
            "Document attached"
        );
        Ok(document)
    }

    pub async fn documents(&self, query_id: Uuid) -> Result<Vec<QueryDocument>> {
        self.get_query(query_id).await?;
        self.store.documents_for_query(query_id).await
    }

    pub async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Suggestion> {
        self.store
            .suggestion_for_query(query_id)
            .await?
            .ok_or_else(|| MedqError::not_found("suggestion", query_id))
    }

    /// Delete every AWAITING_REVIEW query with its documents and suggestion.
    pub async fn purge_awaiting_review(&self) -> Result<usize> {
        let removed = self
            .store
            .delete_queries_with_status(QueryStatus::AwaitingReview)
            .await?;
        tracing::warn!(removed, "Purged queries awaiting review");
        Ok(removed)
    }

    /// Insert the demo patient and doctor when none exist yet.
    /// Returns whether anything was inserted.
    pub async fn seed_demo_data(&self) -> Result<bool> {
        let (patients, doctors) = self.store.identity_counts().await?;
        let mut seeded = false;

        if patients == 0 {
            self.store
                .insert_patient(&Patient {
                    id: DEMO_PATIENT_ID,
                    external_id: "test123".into(),
                    name: "Test Patient".into(),
                    email: "test@example.com".into(),
                    age: Some(30),
                })
                .await?;
            tracing::info!(patient_id = %DEMO_PATIENT_ID, "Seeded demo patient");
            seeded = true;
        }

        if doctors == 0 {
            self.store
                .insert_doctor(&Doctor {
                    id: DEMO_DOCTOR_ID,
                    external_id: "doc123".into(),
                    name: "Dr. Test".into(),
                    email: "doctor@example.com".into(),
                    specialty: Some("General".into()),
                })
                .await?;
            tracing::info!(doctor_id = %DEMO_DOCTOR_ID, "Seeded demo doctor");
            seeded = true;
        }

        Ok(seeded)
    }
}
