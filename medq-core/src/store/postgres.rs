//! PostgreSQL `Store`.
//!
//! Composite writes run in a single `sqlx` transaction and lock the query row
//! with `SELECT ... FOR UPDATE`, so concurrent writers on the same query are
//! serialised. The unique indexes on `suggestions.query_id` and
//! `reviews.query_id` back the one-per-query rule even if two writers race
//! past the application checks; the loser gets `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::Store;
use crate::error::{MedqError, Result};
use crate::models::{
    Doctor, Page, Patient, Query, QueryDocument, QueryFilter, QueryPriority, QueryStatus, Review,
    ReviewFilter, Suggestion,
};
use crate::triage::Triage;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct QueryRow {
    id: Uuid,
    patient_id: Uuid,
    content: String,
    status: String,
    priority: String,
    safety_score: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueryRow> for Query {
    type Error = MedqError;

    fn try_from(row: QueryRow) -> Result<Self> {
        let status = row
            .status
            .parse::<QueryStatus>()
            .map_err(MedqError::PersistenceFailure)?;
        let priority = row.priority.parse().map_err(MedqError::PersistenceFailure)?;
        Ok(Query {
            id: row.id,
            patient_id: row.patient_id,
            content: row.content,
            status,
            priority,
            safety_score: row.safety_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SuggestionRow {
    id: Uuid,
    query_id: Uuid,
    content: String,
    model_used: String,
    confidence_score: f64,
    created_at: DateTime<Utc>,
}

impl From<SuggestionRow> for Suggestion {
    fn from(row: SuggestionRow) -> Self {
        Suggestion {
            id: row.id,
            query_id: row.query_id,
            content: row.content,
            model_used: row.model_used,
            confidence_score: row.confidence_score,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    query_id: Uuid,
    doctor_id: Uuid,
    content: String,
    approved: bool,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: row.id,
            query_id: row.query_id,
            doctor_id: row.doctor_id,
            content: row.content,
            approved: row.approved,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    query_id: Uuid,
    filename: String,
    content_type: String,
    size_bytes: i64,
    text_content: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for QueryDocument {
    fn from(row: DocumentRow) -> Self {
        QueryDocument {
            id: row.id,
            query_id: row.query_id,
            filename: row.filename,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            text_content: row.text_content,
            created_at: row.created_at,
        }
    }
}

const QUERY_COLUMNS: &str =
    "id, patient_id, content, status, priority, safety_score, created_at, updated_at";

// ============================================================================
// Helpers
// ============================================================================

/// Unique-index violations become `Conflict`; anything else stays a database error.
fn conflict_or(e: sqlx::Error, what: impl FnOnce() -> String) -> MedqError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => MedqError::Conflict(what()),
        _ => MedqError::Database(e),
    }
}

fn commit_failed(e: sqlx::Error) -> MedqError {
    MedqError::PersistenceFailure(format!("transaction could not commit: {}", e))
}

async fn lock_query(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Query> {
    let row: QueryRow = sqlx::query_as(&format!(
        "SELECT {} FROM queries WHERE id = $1 FOR UPDATE",
        QUERY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| MedqError::not_found("query", id))?;
    row.try_into()
}

async fn write_status(tx: &mut Transaction<'_, Postgres>, query: &Query) -> Result<()> {
    sqlx::query("UPDATE queries SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(query.status.as_str())
        .bind(query.updated_at)
        .bind(query.id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn push_query_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &QueryFilter) {
    builder.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority.as_str());
    }
    if filter.triaged_only || filter.min_safety_score.is_some() || filter.max_safety_score.is_some()
    {
        builder.push(" AND safety_score IS NOT NULL");
    }
    if let Some(min) = filter.min_safety_score {
        builder.push(" AND safety_score >= ").push_bind(min);
    }
    if let Some(max) = filter.max_safety_score {
        builder.push(" AND safety_score <= ").push_bind(max);
    }
}

fn push_review_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &ReviewFilter) {
    builder.push(" WHERE TRUE");
    if let Some(doctor_id) = filter.doctor_id {
        builder.push(" AND doctor_id = ").push_bind(doctor_id);
    }
    if let Some(approved) = filter.approved {
        builder.push(" AND approved = ").push_bind(approved);
    }
}

// ============================================================================
// Store impl
// ============================================================================

#[async_trait]
impl Store for PgStore {
    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        sqlx::query(
            "INSERT INTO patients (id, external_id, name, email, age) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(patient.id)
        .bind(&patient.external_id)
        .bind(&patient.name)
        .bind(&patient.email)
        .bind(patient.age)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("patient external id {} already registered", patient.external_id)
            })
        })?;
        Ok(())
    }

    async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
        sqlx::query(
            "INSERT INTO doctors (id, external_id, name, email, specialty) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(doctor.id)
        .bind(&doctor.external_id)
        .bind(&doctor.name)
        .bind(&doctor.email)
        .bind(&doctor.specialty)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("doctor external id {} already registered", doctor.external_id)
            })
        })?;
        Ok(())
    }

    async fn patient_exists(&self, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn doctor_exists(&self, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM doctors WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn identity_counts(&self) -> Result<(usize, usize)> {
        let (patients, doctors): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM patients), (SELECT COUNT(*) FROM doctors)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((patients as usize, doctors as usize))
    }

    async fn insert_query(&self, query: &Query) -> Result<()> {
        sqlx::query(
            "INSERT INTO queries (id, patient_id, content, status, priority, safety_score, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(query.id)
        .bind(query.patient_id)
        .bind(&query.content)
        .bind(query.status.as_str())
        .bind(query.priority.as_str())
        .bind(query.safety_score)
        .bind(query.created_at)
        .bind(query.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MedqError::not_found("patient", query.patient_id)
            }
            _ => conflict_or(e, || format!("query {} already exists", query.id)),
        })?;
        Ok(())
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
        let row: Option<QueryRow> =
            sqlx::query_as(&format!("SELECT {} FROM queries WHERE id = $1", QUERY_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Query::try_from).transpose()
    }

    async fn apply_triage(&self, id: Uuid, triage: &Triage, now: DateTime<Utc>) -> Result<Query> {
        let mut tx = self.pool.begin().await?;

        let query = lock_query(&mut tx, id).await?;
        let mut next = query.transitioned(QueryStatus::AwaitingReview, now)?;
        next.priority = triage.priority;
        next.safety_score = Some(triage.safety_score);

        sqlx::query(
            "UPDATE queries SET status = $1, priority = $2, safety_score = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(next.status.as_str())
        .bind(next.priority.as_str())
        .bind(next.safety_score)
        .bind(next.updated_at)
        .bind(next.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(commit_failed)?;
        Ok(next)
    }

    async fn transition_query(
        &self,
        id: Uuid,
        to: QueryStatus,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let mut tx = self.pool.begin().await?;

        let query = lock_query(&mut tx, id).await?;
        let next = query.transitioned(to, now)?;
        write_status(&mut tx, &next).await?;

        tx.commit().await.map_err(commit_failed)?;
        Ok(next)
    }

    async fn set_priority(
        &self,
        id: Uuid,
        priority: QueryPriority,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let row: Option<QueryRow> = sqlx::query_as(&format!(
            "UPDATE queries SET priority = $1, updated_at = $2 WHERE id = $3 RETURNING {}",
            QUERY_COLUMNS
        ))
        .bind(priority.as_str())
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| MedqError::not_found("query", id))?
            .try_into()
    }

    async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM queries");
        push_query_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM queries", QUERY_COLUMNS));
        push_query_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id ASC OFFSET ")
            .push_bind(filter.skip as i64)
            .push(" LIMIT ")
            .push_bind(filter.limit() as i64);

        let rows: Vec<QueryRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(Query::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
        })
    }

    async fn delete_query(&self, id: Uuid) -> Result<bool> {
        // Documents, suggestion and review go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM queries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_queries_with_status(&self, status: QueryStatus) -> Result<usize> {
        let result = sqlx::query("DELETE FROM queries WHERE status = $1")
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_document(&self, document: &QueryDocument) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_documents (id, query_id, filename, content_type, size_bytes, text_content, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(document.id)
        .bind(document.query_id)
        .bind(&document.filename)
        .bind(&document.content_type)
        .bind(document.size_bytes)
        .bind(&document.text_content)
        .bind(document.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MedqError::not_found("query", document.query_id)
            }
            _ => MedqError::Database(e),
        })?;
        Ok(())
    }

    async fn documents_for_query(&self, query_id: Uuid) -> Result<Vec<QueryDocument>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, query_id, filename, content_type, size_bytes, text_content, created_at
             FROM query_documents WHERE query_id = $1 ORDER BY created_at ASC",
        )
        .bind(query_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QueryDocument::from).collect())
    }

    async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Option<Suggestion>> {
        let row: Option<SuggestionRow> = sqlx::query_as(
            "SELECT id, query_id, content, model_used, confidence_score, created_at
             FROM suggestions WHERE query_id = $1",
        )
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Suggestion::from))
    }

    async fn review_for_query(&self, query_id: Uuid) -> Result<Option<Review>> {
        let row: Option<ReviewRow> = sqlx::query_as(
            "SELECT id, query_id, doctor_id, content, approved, notes, created_at
             FROM reviews WHERE query_id = $1",
        )
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Review::from))
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reviews");
        push_review_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT id, query_id, doctor_id, content, approved, notes, created_at FROM reviews",
        );
        push_review_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id ASC OFFSET ")
            .push_bind(filter.skip as i64)
            .push(" LIMIT ")
            .push_bind(filter.limit() as i64);

        let rows: Vec<ReviewRow> = select.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            items: rows.into_iter().map(Review::from).collect(),
            total: total as usize,
        })
    }

    async fn commit_suggestion(
        &self,
        suggestion: &Suggestion,
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let mut tx = self.pool.begin().await?;

        let query = lock_query(&mut tx, suggestion.query_id).await?;

        // Suggestion writers all hold the query row lock, so this read is stable.
        let existing: Option<String> =
            sqlx::query_scalar("SELECT content FROM suggestions WHERE query_id = $1")
                .bind(suggestion.query_id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(content) = existing {
            if !content.trim().is_empty() {
                return Err(MedqError::Conflict(format!(
                    "suggestion for query {} already exists",
                    suggestion.query_id
                )));
            }
            sqlx::query("DELETE FROM suggestions WHERE query_id = $1")
                .bind(suggestion.query_id)
                .execute(&mut *tx)
                .await?;
            tracing::warn!(query_id = %suggestion.query_id, "Superseding blank suggestion");
        }

        let next = query.transitioned(QueryStatus::AwaitingReview, now)?;

        sqlx::query(
            "INSERT INTO suggestions (id, query_id, content, model_used, confidence_score, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(suggestion.id)
        .bind(suggestion.query_id)
        .bind(&suggestion.content)
        .bind(&suggestion.model_used)
        .bind(suggestion.confidence_score)
        .bind(suggestion.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("suggestion for query {} already exists", suggestion.query_id)
            })
        })?;

        write_status(&mut tx, &next).await?;

        // Dropping `tx` on any early return above rolls the transaction back.
        tx.commit().await.map_err(commit_failed)?;

        tracing::debug!(query_id = %next.id, suggestion_id = %suggestion.id, "Suggestion committed");
        Ok(next)
    }

    async fn commit_review(&self, review: &Review, now: DateTime<Utc>) -> Result<Query> {
        let mut tx = self.pool.begin().await?;

        let query = lock_query(&mut tx, review.query_id).await?;
        let next = query.transitioned(QueryStatus::Reviewed, now)?;

        sqlx::query(
            "INSERT INTO reviews (id, query_id, doctor_id, content, approved, notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(review.id)
        .bind(review.query_id)
        .bind(review.doctor_id)
        .bind(&review.content)
        .bind(review.approved)
        .bind(&review.notes)
        .bind(review.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MedqError::not_found("doctor", review.doctor_id)
            }
            _ => conflict_or(e, || format!("review for query {} already exists", review.query_id)),
        })?;

        write_status(&mut tx, &next).await?;
        tx.commit().await.map_err(commit_failed)?;

        tracing::debug!(query_id = %next.id, review_id = %review.id, "Review committed");
        Ok(next)
    }
}
