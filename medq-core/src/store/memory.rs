//! In-process `Store` used by tests and the server's `--memory` demo mode.
//!
//! One async mutex guards all tables, so every method, composite writes
//! included, observes and produces a consistent snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::error::{MedqError, Result};
use crate::models::{
    Doctor, Page, Patient, Query, QueryDocument, QueryFilter, QueryPriority, QueryStatus, Review,
    ReviewFilter, Suggestion,
};
use crate::triage::Triage;

#[derive(Default)]
struct Tables {
    patients: HashMap<Uuid, Patient>,
    doctors: HashMap<Uuid, Doctor>,
    queries: HashMap<Uuid, Query>,
    documents: Vec<QueryDocument>,
    /// Keyed by query id: at most one per query.
    suggestions: HashMap<Uuid, Suggestion>,
    /// Keyed by query id: at most one per query.
    reviews: HashMap<Uuid, Review>,
}

impl Tables {
    fn remove_query(&mut self, id: Uuid) -> bool {
        self.documents.retain(|d| d.query_id != id);
        self.suggestions.remove(&id);
        self.reviews.remove(&id);
        self.queries.remove(&id).is_some()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, skip: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let items = items.into_iter().skip(skip).take(limit).collect();
    Page { items, total }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.patients.values().any(|p| p.external_id == patient.external_id) {
            return Err(MedqError::Conflict(format!(
                "patient external id {} already registered",
                patient.external_id
            )));
        }
        t.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.doctors.values().any(|d| d.external_id == doctor.external_id) {
            return Err(MedqError::Conflict(format!(
                "doctor external id {} already registered",
                doctor.external_id
            )));
        }
        t.doctors.insert(doctor.id, doctor.clone());
        Ok(())
    }

    async fn patient_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.patients.contains_key(&id))
    }

    async fn doctor_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.doctors.contains_key(&id))
    }

    async fn identity_counts(&self) -> Result<(usize, usize)> {
        let t = self.tables.lock().await;
        Ok((t.patients.len(), t.doctors.len()))
    }

    async fn insert_query(&self, query: &Query) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.patients.contains_key(&query.patient_id) {
            return Err(MedqError::not_found("patient", query.patient_id));
        }
        if t.queries.contains_key(&query.id) {
            return Err(MedqError::Conflict(format!("query {} already exists", query.id)));
        }
        t.queries.insert(query.id, query.clone());
        Ok(())
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
        Ok(self.tables.lock().await.queries.get(&id).cloned())
    }

    async fn apply_triage(&self, id: Uuid, triage: &Triage, now: DateTime<Utc>) -> Result<Query> {
        let mut t = self.tables.lock().await;
        let stored = t
            .queries
            .get_mut(&id)
            .ok_or_else(|| MedqError::not_found("query", id))?;

        let mut next = stored.transitioned(QueryStatus::AwaitingReview, now)?;
        next.priority = triage.priority;
        next.safety_score = Some(triage.safety_score);
        *stored = next.clone();
        Ok(next)
    }

    async fn transition_query(
        &self,
        id: Uuid,
        to: QueryStatus,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let mut t = self.tables.lock().await;
        let stored = t
            .queries
            .get_mut(&id)
            .ok_or_else(|| MedqError::not_found("query", id))?;

        stored.transition_to(to, now)?;
        Ok(stored.clone())
    }

    async fn set_priority(
        &self,
        id: Uuid,
        priority: QueryPriority,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let mut t = self.tables.lock().await;
        let stored = t
            .queries
            .get_mut(&id)
            .ok_or_else(|| MedqError::not_found("query", id))?;

        stored.priority = priority;
        stored.updated_at = Some(now);
        Ok(stored.clone())
    }

    async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>> {
        let t = self.tables.lock().await;
        let mut matching: Vec<Query> = t
            .queries
            .values()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matching, filter.skip, filter.limit()))
    }

    async fn delete_query(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.remove_query(id))
    }

    async fn delete_queries_with_status(&self, status: QueryStatus) -> Result<usize> {
        let mut t = self.tables.lock().await;
        let ids: Vec<Uuid> = t
            .queries
            .values()
            .filter(|q| q.status == status)
            .map(|q| q.id)
            .collect();
        for id in &ids {
            t.remove_query(*id);
        }
        Ok(ids.len())
    }

    async fn insert_document(&self, document: &QueryDocument) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.queries.contains_key(&document.query_id) {
            return Err(MedqError::not_found("query", document.query_id));
        }
        t.documents.push(document.clone());
        Ok(())
    }

    async fn documents_for_query(&self, query_id: Uuid) -> Result<Vec<QueryDocument>> {
        let t = self.tables.lock().await;
        Ok(t.documents
            .iter()
            .filter(|d| d.query_id == query_id)
            .cloned()
            .collect())
    }

    async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Option<Suggestion>> {
        Ok(self.tables.lock().await.suggestions.get(&query_id).cloned())
    }

    async fn review_for_query(&self, query_id: Uuid) -> Result<Option<Review>> {
        Ok(self.tables.lock().await.reviews.get(&query_id).cloned())
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>> {
        let t = self.tables.lock().await;
        let mut matching: Vec<Review> = t
            .reviews
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matching, filter.skip, filter.limit()))
    }

    async fn commit_suggestion(
        &self,
        suggestion: &Suggestion,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let mut t = self.tables.lock().await;

        let query = t
            .queries
            .get(&suggestion.query_id)
            .ok_or_else(|| MedqError::not_found("query", suggestion.query_id))?;
        if t
            .suggestions
            .get(&suggestion.query_id)
            .is_some_and(Suggestion::is_usable)
        {
            return Err(MedqError::Conflict(format!(
                "suggestion for query {} already exists",
                suggestion.query_id
            )));
        }
        let next = query.transitioned(QueryStatus::AwaitingReview, now)?;

        // Every check passed; apply both writes under the same lock. A blank
        // suggestion on file is replaced.
        t.suggestions.insert(suggestion.query_id, suggestion.clone());
        t.queries.insert(next.id, next.clone());
        Ok(next)
    }

    async fn commit_review(&self, review: &Review, now: DateTime<Utc>) -> Result<Query> {
        let mut t = self.tables.lock().await;

        let query = t
            .queries
            .get(&review.query_id)
            .ok_or_else(|| MedqError::not_found("query", review.query_id))?;
        let next = query.transitioned(QueryStatus::Reviewed, now)?;
        if !t.doctors.contains_key(&review.doctor_id) {
            return Err(MedqError::not_found("doctor", review.doctor_id));
        }
        if t.reviews.contains_key(&review.query_id) {
            return Err(MedqError::Conflict(format!(
                "review for query {} already exists",
                review.query_id
            )));
        }

        t.reviews.insert(review.query_id, review.clone());
        t.queries.insert(next.id, next.clone());
        Ok(next)
    }
}
