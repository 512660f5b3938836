//! Persistence collaborator.
//!
//! `Store` is the only way the lifecycle code touches durable state. Lookups
//! return typed `Option`s. Every write that changes a query's status
//! (`apply_triage`, `transition_query`, `commit_suggestion`, `commit_review`)
//! is a single transaction that re-reads the query, runs the state machine
//! against the fresh row, and either applies everything or nothing. Callers
//! never write a status they read earlier.

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Doctor, Page, Patient, Query, QueryDocument, QueryFilter, QueryPriority, QueryStatus, Review,
    ReviewFilter, Suggestion,
};
use crate::triage::Triage;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // --- identity ---
    async fn insert_patient(&self, patient: &Patient) -> Result<()>;
    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()>;
    async fn patient_exists(&self, id: Uuid) -> Result<bool>;
    async fn doctor_exists(&self, id: Uuid) -> Result<bool>;
    /// Number of (patients, doctors); used to decide on demo seeding.
    async fn identity_counts(&self) -> Result<(usize, usize)>;

    // --- queries ---
    async fn insert_query(&self, query: &Query) -> Result<()>;
    async fn get_query(&self, id: Uuid) -> Result<Option<Query>>;
    /// Record `triage` and move the query to `AwaitingReview`, atomically.
    async fn apply_triage(&self, id: Uuid, triage: &Triage, now: DateTime<Utc>) -> Result<Query>;
    /// Move the query to `to` if its stored status allows it.
    async fn transition_query(&self, id: Uuid, to: QueryStatus, now: DateTime<Utc>)
        -> Result<Query>;
    /// Overwrite the priority and stamp `updated_at`. Status is never written.
    async fn set_priority(
        &self,
        id: Uuid,
        priority: QueryPriority,
        now: DateTime<Utc>,
    ) -> Result<Query>;
    async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>>;
    /// Removes the query together with its documents, suggestion and review.
    async fn delete_query(&self, id: Uuid) -> Result<bool>;
    /// Same cascade as `delete_query`, for every query in `status`.
    async fn delete_queries_with_status(&self, status: QueryStatus) -> Result<usize>;

    // --- documents ---
    async fn insert_document(&self, document: &QueryDocument) -> Result<()>;
    async fn documents_for_query(&self, query_id: Uuid) -> Result<Vec<QueryDocument>>;

    // --- suggestions & reviews ---
    async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Option<Suggestion>>;
    async fn review_for_query(&self, query_id: Uuid) -> Result<Option<Review>>;
    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>>;

    /// Insert `suggestion` and move its query to `AwaitingReview`, atomically.
    ///
    /// A stored suggestion with blank content is superseded in the same
    /// transaction. Fails with `Conflict` when a usable suggestion already
    /// exists, `InvalidStateTransition` when the stored status forbids the move.
    async fn commit_suggestion(&self, suggestion: &Suggestion, now: DateTime<Utc>)
        -> Result<Query>;

    /// Insert `review` and move its query to `Reviewed`, atomically.
    ///
    /// Fails with `InvalidStateTransition` unless the stored status is
    /// `AwaitingReview`, and with `Conflict` when a review already exists.
    async fn commit_review(&self, review: &Review, now: DateTime<Utc>) -> Result<Query>;
}
