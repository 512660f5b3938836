//! Suggestion generation.
//!
//! At most one suggestion exists per query. A usable stored suggestion is
//! returned as-is; otherwise the generator asks the LLM for a draft (outside
//! any transaction, with bounded retry on transient failures) and commits the
//! suggestion together with the AWAITING_REVIEW transition. When a concurrent
//! caller commits first, the loser returns the winner's suggestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::config::SuggestionConfig;
use crate::error::{MedqError, Result};
use crate::lifecycle::check_transition;
use crate::llm::{ChatMessage, LlmBackend, LlmError};
use crate::models::document::extracted_texts;
use crate::models::{ExtractedDocuments, Query, QueryStatus, Suggestion};
use crate::prompt::{document_digest, PromptRouter, TopicRouter};
use crate::store::Store;

pub struct SuggestionGenerator {
    llm: Arc<dyn LlmBackend>,
    store: Arc<dyn Store>,
    router: Box<dyn PromptRouter>,
    config: SuggestionConfig,
}

impl SuggestionGenerator {
    /// Generator with diabetes topic routing.
    pub fn new(llm: Arc<dyn LlmBackend>, store: Arc<dyn Store>, config: SuggestionConfig) -> Self {
        Self {
            llm,
            store,
            router: Box::new(TopicRouter),
            config,
        }
    }

    /// Replace the prompt routing strategy.
    pub fn with_router(mut self, router: impl PromptRouter + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Return the query's suggestion, generating and committing one if needed.
    pub async fn generate_suggestion(
        &self,
        query: &Query,
        documents: Option<&ExtractedDocuments>,
    ) -> Result<Suggestion> {
        let stored = self
            .store
            .get_query(query.id)
            .await?
            .ok_or_else(|| MedqError::not_found("query", query.id))?;

        if stored.content.trim().is_empty() {
            return Err(MedqError::InvalidInput(format!(
                "query {} has no content",
                stored.id
            )));
        }

        if let Some(existing) = self.usable_suggestion(stored.id).await? {
            tracing::debug!(
                query_id = %stored.id,
                suggestion_id = %existing.id,
                "Returning existing suggestion"
            );
            return Ok(existing);
        }

        // Fail before spending an LLM call on a query that can no longer move.
        check_transition(stored.status, QueryStatus::AwaitingReview)?;

        let digest = documents.and_then(document_digest);
        let (max_tokens, confidence) = match digest {
            Some(_) => (
                self.config.max_tokens_with_documents,
                self.config.confidence_with_documents,
            ),
            None => (self.config.max_tokens, self.config.confidence),
        };

        let mut user_text = stored.content.clone();
        if let Some(digest) = &digest {
            user_text.push_str(digest);
        }
        let messages = vec![
            ChatMessage::system(self.router.system_prompt(&stored.content)),
            ChatMessage::user(user_text),
        ];

        let content = self.complete_with_retry(stored.id, &messages, max_tokens).await?;
        if content.trim().is_empty() {
            return Err(MedqError::PermanentUpstreamFailure(
                "model returned an empty completion".to_string(),
            ));
        }

        let suggestion = Suggestion::new(stored.id, content, self.llm.model(), confidence);
        match self.store.commit_suggestion(&suggestion, Utc::now()).await {
            Ok(_) => {
                tracing::info!(
                    query_id = %stored.id,
                    suggestion_id = %suggestion.id,
                    model = %suggestion.model_used,
                    with_documents = digest.is_some(),
                    "Suggestion generated"
                );
                Ok(suggestion)
            }
            Err(MedqError::Conflict(reason)) => {
                tracing::warn!(query_id = %stored.id, reason = %reason, "Lost suggestion race");
                self.usable_suggestion(stored.id)
                    .await?
                    .ok_or(MedqError::Conflict(reason))
            }
            Err(MedqError::Database(e)) => Err(MedqError::PersistenceFailure(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Load the query and its stored documents, then generate.
    pub async fn generate_for_query_id(&self, query_id: Uuid) -> Result<Suggestion> {
        let query = self
            .store
            .get_query(query_id)
            .await?
            .ok_or_else(|| MedqError::not_found("query", query_id))?;

        let documents = extracted_texts(&self.store.documents_for_query(query_id).await?);
        let documents = (!documents.is_empty()).then_some(documents);

        self.generate_suggestion(&query, documents.as_ref()).await
    }

    async fn usable_suggestion(&self, query_id: Uuid) -> Result<Option<Suggestion>> {
        Ok(self
            .store
            .suggestion_for_query(query_id)
            .await?
            .filter(Suggestion::is_usable))
    }

    async fn complete_with_retry(
        &self,
        query_id: Uuid,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.retry_base_ms)
            .max_delay(Duration::from_secs(self.config.retry_max_delay_secs))
            .map(jitter)
            .take(max_attempts - 1);

        let mut attempts = 0usize;
        let result = RetryIf::spawn(
            strategy,
            || {
                attempts += 1;
                tracing::debug!(query_id = %query_id, attempt = attempts, "Calling LLM");
                self.llm.complete(messages, max_tokens)
            },
            |e: &LlmError| {
                let retry = e.is_transient();
                if retry {
                    tracing::warn!(query_id = %query_id, error = %e, "Transient LLM failure");
                }
                retry
            },
        )
        .await;

        match result {
            Ok(content) => Ok(content),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    query_id = %query_id,
                    attempts,
                    error = %e,
                    "All LLM attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                }
                .into())
            }
            Err(e) => {
                tracing::error!(query_id = %query_id, error = %e, "LLM rejected request");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::models::{
        Doctor, Page, Patient, QueryDocument, QueryFilter, QueryPriority, Review, ReviewFilter,
    };
    use crate::prompt::{FixedPrompt, DIABETES_PROMPT};
    use crate::store::MemoryStore;
    use crate::triage::Triage;

    /// Replays scripted results, then answers "Scripted suggestion".
    pub(crate) struct ScriptedBackend {
        script: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
        calls: AtomicUsize,
        pub seen: Mutex<Vec<(Vec<ChatMessage>, u32)>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<std::result::Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            max_output_tokens: u32,
        ) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((messages.to_vec(), max_output_tokens));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok("Scripted suggestion".to_string()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn fast_config() -> SuggestionConfig {
        SuggestionConfig {
            retry_base_ms: 1,
            ..SuggestionConfig::default()
        }
    }

    async fn seeded(status: QueryStatus, content: &str) -> (Arc<MemoryStore>, Query) {
        let store = Arc::new(MemoryStore::new());
        let patient = Patient {
            id: Uuid::new_v4(),
            external_id: "p-1".into(),
            name: "Pat".into(),
            email: "pat@example.com".into(),
            age: None,
        };
        store.insert_patient(&patient).await.unwrap();
        let mut query = Query::new(patient.id, content);
        query.status = status;
        store.insert_query(&query).await.unwrap();
        (store, query)
    }

    fn generator(backend: Arc<ScriptedBackend>, store: Arc<dyn Store>) -> SuggestionGenerator {
        SuggestionGenerator::new(backend, store, fast_config())
    }

    fn api_error(code: u16) -> LlmError {
        LlmError::Api {
            code,
            message: "upstream".into(),
        }
    }

    #[tokio::test]
    async fn test_generates_and_moves_to_awaiting_review() {
        let (store, query) = seeded(QueryStatus::Pending, "My blood sugar is 250").await;
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("Check ketones".into())]));
        let generator = generator(backend.clone(), store.clone());

        let suggestion = generator.generate_suggestion(&query, None).await.unwrap();
        assert_eq!(suggestion.content, "Check ketones");
        assert_eq!(suggestion.model_used, "scripted");
        assert_eq!(suggestion.confidence_score, 0.8);

        let stored = store.get_query(query.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::AwaitingReview);
        assert!(stored.updated_at.is_some());

        let seen = backend.seen.lock().unwrap();
        let (messages, max_tokens) = &seen[0];
        assert_eq!(*max_tokens, 1000);
        assert_eq!(messages[0], ChatMessage::system(DIABETES_PROMPT));
        assert_eq!(messages[1], ChatMessage::user("My blood sugar is 250"));
    }

    #[tokio::test]
    async fn test_second_call_returns_same_suggestion() {
        let (store, query) = seeded(QueryStatus::Pending, "Headache for two days").await;
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = generator(backend.clone(), store.clone());

        let first = generator.generate_suggestion(&query, None).await.unwrap();
        let second = generator.generate_suggestion(&query, None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.content, second.content);
        assert_eq!(backend.calls(), 1);
        assert_eq!(
            store.suggestion_for_query(query.id).await.unwrap().unwrap().id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_blank_stored_suggestion_is_regenerated() {
        let (store, query) = seeded(QueryStatus::Pending, "Dizzy after standing up").await;
        let blank = Suggestion::new(query.id, "  ", "scripted", 0.8);
        store.commit_suggestion(&blank, Utc::now()).await.unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![Ok("Stand up slowly".into())]));
        let generator = generator(backend.clone(), store.clone());

        let suggestion = generator.generate_suggestion(&query, None).await.unwrap();
        assert_eq!(suggestion.content, "Stand up slowly");
        assert_ne!(suggestion.id, blank.id);
        assert_eq!(backend.calls(), 1);

        let persisted = store.suggestion_for_query(query.id).await.unwrap().unwrap();
        assert_eq!(persisted.id, suggestion.id);

        // Later calls reuse it instead of hitting the model again.
        generator.generate_suggestion(&query, None).await.unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_persist_one_suggestion() {
        let (store, query) = seeded(QueryStatus::Pending, "Rash on my arm").await;
        let backend = Arc::new(
            ScriptedBackend::new(vec![Ok("first draft".into()), Ok("second draft".into())])
                .with_delay(Duration::from_millis(20)),
        );
        let generator = generator(backend.clone(), store.clone());

        let (a, b) = tokio::join!(
            generator.generate_suggestion(&query, None),
            generator.generate_suggestion(&query, None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.id, b.id);
        assert_eq!(a.content, b.content);
        assert!(a.is_usable());
        let persisted = store.suggestion_for_query(query.id).await.unwrap().unwrap();
        assert_eq!(persisted.id, a.id);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (store, query) = seeded(QueryStatus::Pending, "Sore throat").await;
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(api_error(503)),
            Err(api_error(429)),
            Ok("Rest and fluids".into()),
        ]));
        let generator = generator(backend.clone(), store.clone());

        let suggestion = generator.generate_suggestion(&query, None).await.unwrap();
        assert_eq!(suggestion.content, "Rest and fluids");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let (store, query) = seeded(QueryStatus::Pending, "Sore throat").await;
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(api_error(502)),
            Err(api_error(502)),
            Err(api_error(502)),
            Ok("too late".into()),
        ]));
        let generator = generator(backend.clone(), store.clone());

        let err = generator.generate_suggestion(&query, None).await.unwrap_err();
        assert!(matches!(err, MedqError::TransientUpstreamFailure(_)));
        assert_eq!(backend.calls(), 3);

        let stored = store.get_query(query.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::Pending);
        assert!(store.suggestion_for_query(query.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (store, query) = seeded(QueryStatus::Pending, "Sore throat").await;
        let backend = Arc::new(ScriptedBackend::new(vec![Err(api_error(400))]));
        let generator = generator(backend.clone(), store.clone());

        let err = generator.generate_suggestion(&query, None).await.unwrap_err();
        assert!(matches!(err, MedqError::PermanentUpstreamFailure(_)));
        assert!(err.to_string().contains("400"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_documents_raise_budget_and_lower_confidence() {
        let (store, query) = seeded(QueryStatus::Pending, "Are my labs okay?").await;
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = generator(backend.clone(), store.clone());

        let mut docs = ExtractedDocuments::new();
        docs.insert("labs.txt".into(), "Name: Pat\nGlucose 180 mg/dL".into());

        let suggestion = generator
            .generate_suggestion(&query, Some(&docs))
            .await
            .unwrap();
        assert_eq!(suggestion.confidence_score, 0.75);

        let seen = backend.seen.lock().unwrap();
        let (messages, max_tokens) = &seen[0];
        assert_eq!(*max_tokens, 1500);
        assert!(messages[1].content.starts_with("Are my labs okay?"));
        assert!(messages[1].content.contains("--- labs.txt ---\nglucose 180 mg/dl"));
        assert!(!messages[1].content.contains("name: pat"));
    }

    #[tokio::test]
    async fn test_generate_for_query_id_uses_stored_documents() {
        let (store, query) = seeded(QueryStatus::Pending, "Are my labs okay?").await;
        let doc = QueryDocument::new(
            query.id,
            "labs.txt",
            "text/plain",
            20,
            Some("HbA1c 8.1 %".into()),
        )
        .unwrap();
        store.insert_document(&doc).await.unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = generator(backend.clone(), store.clone());

        let suggestion = generator.generate_for_query_id(query.id).await.unwrap();
        assert_eq!(suggestion.confidence_score, 0.75);
        assert_eq!(backend.seen.lock().unwrap()[0].1, 1500);
    }

    #[tokio::test]
    async fn test_router_is_pluggable() {
        let (store, query) = seeded(QueryStatus::Pending, "My blood sugar is 250").await;
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator =
            generator(backend.clone(), store.clone()).with_router(FixedPrompt("Be brief.".into()));

        generator.generate_suggestion(&query, None).await.unwrap();
        assert_eq!(
            backend.seen.lock().unwrap()[0].0[0],
            ChatMessage::system("Be brief.")
        );
    }

    #[tokio::test]
    async fn test_reviewed_query_without_suggestion_is_rejected() {
        let (store, query) = seeded(QueryStatus::Reviewed, "Follow-up question").await;
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = generator(backend.clone(), store.clone());

        let err = generator.generate_suggestion(&query, None).await.unwrap_err();
        assert!(matches!(
            err,
            MedqError::InvalidStateTransition {
                from: QueryStatus::Reviewed,
                to: QueryStatus::AwaitingReview,
            }
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_or_blank_query() {
        let (store, query) = seeded(QueryStatus::Pending, "   ").await;
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = generator(backend.clone(), store.clone());

        let err = generator.generate_suggestion(&query, None).await.unwrap_err();
        assert!(matches!(err, MedqError::InvalidInput(_)));

        let err = generator.generate_for_query_id(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MedqError::NotFound { entity: "query", .. }));
        assert_eq!(backend.calls(), 0);
    }

    /// Delegates to `MemoryStore` but refuses to commit suggestions.
    struct CommitFailingStore(MemoryStore);

    #[async_trait]
    impl Store for CommitFailingStore {
        async fn insert_patient(&self, patient: &Patient) -> Result<()> {
            self.0.insert_patient(patient).await
        }
        async fn insert_doctor(&self, doctor: &Doctor) -> Result<()> {
            self.0.insert_doctor(doctor).await
        }
        async fn patient_exists(&self, id: Uuid) -> Result<bool> {
            self.0.patient_exists(id).await
        }
        async fn doctor_exists(&self, id: Uuid) -> Result<bool> {
            self.0.doctor_exists(id).await
        }
        async fn identity_counts(&self) -> Result<(usize, usize)> {
            self.0.identity_counts().await
        }
        async fn insert_query(&self, query: &Query) -> Result<()> {
            self.0.insert_query(query).await
        }
        async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
            self.0.get_query(id).await
        }
        async fn apply_triage(
            &self,
            id: Uuid,
            triage: &Triage,
            now: DateTime<Utc>,
        ) -> Result<Query> {
            self.0.apply_triage(id, triage, now).await
        }
        async fn transition_query(
            &self,
            id: Uuid,
            to: QueryStatus,
            now: DateTime<Utc>,
        ) -> Result<Query> {
            self.0.transition_query(id, to, now).await
        }
        async fn set_priority(
            &self,
            id: Uuid,
            priority: QueryPriority,
            now: DateTime<Utc>,
        ) -> Result<Query> {
            self.0.set_priority(id, priority, now).await
        }
        async fn list_queries(&self, filter: &QueryFilter) -> Result<Page<Query>> {
            self.0.list_queries(filter).await
        }
        async fn delete_query(&self, id: Uuid) -> Result<bool> {
            self.0.delete_query(id).await
        }
        async fn delete_queries_with_status(&self, status: QueryStatus) -> Result<usize> {
            self.0.delete_queries_with_status(status).await
        }
        async fn insert_document(&self, document: &QueryDocument) -> Result<()> {
            self.0.insert_document(document).await
        }
        async fn documents_for_query(&self, query_id: Uuid) -> Result<Vec<QueryDocument>> {
            self.0.documents_for_query(query_id).await
        }
        async fn suggestion_for_query(&self, query_id: Uuid) -> Result<Option<Suggestion>> {
            self.0.suggestion_for_query(query_id).await
        }
        async fn review_for_query(&self, query_id: Uuid) -> Result<Option<Review>> {
            self.0.review_for_query(query_id).await
        }
        async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Page<Review>> {
            self.0.list_reviews(filter).await
        }
        async fn commit_suggestion(
            &self,
            _suggestion: &Suggestion,
            _now: DateTime<Utc>,
        ) -> Result<Query> {
            Err(MedqError::PersistenceFailure("disk full".into()))
        }
        async fn commit_review(&self, review: &Review, now: DateTime<Utc>) -> Result<Query> {
            self.0.commit_review(review, now).await
        }
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_no_partial_state() {
        let store = Arc::new(CommitFailingStore(MemoryStore::new()));
        let patient = Patient {
            id: Uuid::new_v4(),
            external_id: "p-1".into(),
            name: "Pat".into(),
            email: "pat@example.com".into(),
            age: None,
        };
        store.insert_patient(&patient).await.unwrap();
        let query = Query::new(patient.id, "Persistent cough");
        store.insert_query(&query).await.unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let generator = SuggestionGenerator::new(backend, store.clone(), fast_config());

        let err = generator.generate_suggestion(&query, None).await.unwrap_err();
        assert!(matches!(err, MedqError::PersistenceFailure(_)));

        let stored = store.get_query(query.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::Pending);
        assert!(store.suggestion_for_query(query.id).await.unwrap().is_none());
    }
}
