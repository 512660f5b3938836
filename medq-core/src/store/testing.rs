//! Test double that lands a competing write in the middle of a caller's
//! read-then-write sequence.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{MemoryStore, Store};
use crate::error::Result;
use crate::models::{
    Doctor, Page, Patient, Query, QueryDocument, QueryFilter, QueryPriority, QueryStatus, Review,
    ReviewFilter, Suggestion,
};
use crate::triage::Triage;

/// A write another caller completes concurrently.
pub(crate) enum CompetingWrite {
    Suggestion(Suggestion),
    Review(Review),
}

/// `MemoryStore` that applies one `CompetingWrite` right after the first
/// `get_query` returns, or right before the first query write if no read
/// comes first.
pub(crate) struct InterleavingStore {
    pub inner: MemoryStore,
    pending: Mutex<Option<CompetingWrite>>,
}

impl InterleavingStore {
    pub fn new(inner: MemoryStore, write: CompetingWrite) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(write)),
        }
    }

    async fn interleave(&self) {
        let pending = self.pending.lock().unwrap().take();
        match pending {
            Some(CompetingWrite::Suggestion(s)) => {
                self.inner.commit_suggestion(&s, Utc::now()).await.unwrap();
            }
            Some(CompetingWrite::Review(r)) => {
                self.inner.commit_review(&r, Utc::now()).await.unwrap();
            }
            None => {}
        }
    }
}

#[async_trait]
impl Store for InterleavingStore {
    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        self.inner.insert_patient(patient).await
    }
    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
        self.inner.insert_doctor(doctor).await
    }
    async fn patient_exists(&self, id: Uuid) -> Result<bool> {
        self.inner.patient_exists(id).await
    }
    async fn doctor_exists(&self, id: Uuid) -> Result<bool> {
        self.inner.doctor_exists(id).await
    }
    async fn identity_counts(&self) -> Result<(usize, usize)> {
        self.inner.identity_counts().await
    }
    async fn insert_query(&self, query: &Query) -> Result<()> {
        self.inner.insert_query(query).await
    }
    async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
        let snapshot = self.inner.get_query(id).await;
        self.interleave().await;
        snapshot
    }
    async fn apply_triage(&self, id: Uuid, triage: &Triage, now: DateTime<Utc>) -> Result<Query> {
        self.interleave().await;
        self.inner.apply_triage(id, triage, now).await
    }
    async fn transition_query(
        &self,
        id: Uuid,
        to: QueryStatus,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        self.interleave().await;
        self.inner.transition_query(id, to, now).await
    }
    async fn set_priority(
        &self,
        id: Uuid,
        priority: QueryPriority,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        self.interleave().await;
        self.inner.set_priority(id, priority, now).await
    }
    async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>> {
        self.inner.list_queries(filter).await
    }
    async fn delete_query(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_query(id).await
    }
    async fn delete_queries_with_status(&self, status: QueryStatus) -> Result<usize> {
        self.inner.delete_queries_with_status(status).await
    }
    async fn insert_document(&self, document: &QueryDocument) -> Result<()> {
        self.inner.insert_document(document).await
    }
    async fn documents_for_query(&self, query_id: Uuid) -> Result<Vec<QueryDocument>> {
        self.inner.documents_for_query(query_id).await
    }
    async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Option<Suggestion>> {
        self.inner.suggestion_for_query(query_id).await
    }
    async fn review_for_query(&self, query_id: Uuid) -> Result<Option<Review>> {
        self.inner.review_for_query(query_id).await
    }
    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>> {
        self.inner.list_reviews(filter).await
    }
    async fn commit_suggestion(
        &self,
        suggestion: &Suggestion,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        self.inner.commit_suggestion(suggestion, now).await
    }
    async fn commit_review(&self, review: &Review, now: DateTime<Utc>) -> Result<Query> {
        self.inner.commit_review(review, now).await
    }
}
