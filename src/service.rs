//! Query service: orchestrates submission, expert responses, reads, and the
//! bulk clear across the store, the broadcast registry, and the external
//! collaborators.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    broadcast::{BroadcastRegistry, PushEvent},
    catalog::{CatalogInfo, Expert, ExpertCatalog},
    error::ServiceError,
    generator::AnswerGenerator,
    persistence::DurableStore,
    store::{AssignedExpert, ExpertResponse, QueryRecord, QuerySummary, QueryStore},
};

pub struct QueryService {
    store: Arc<QueryStore>,
    registry: Arc<BroadcastRegistry>,
    catalog: Arc<dyn ExpertCatalog>,
    generator: Arc<dyn AnswerGenerator>,
    durable: Arc<dyn DurableStore>,
    top_k: usize,
}

impl QueryService {
    pub fn new(
        store: Arc<QueryStore>,
        registry: Arc<BroadcastRegistry>,
        catalog: Arc<dyn ExpertCatalog>,
        generator: Arc<dyn AnswerGenerator>,
        durable: Arc<dyn DurableStore>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            generator,
            durable,
            top_k,
        }
    }

    /// Submit a question: rank experts, generate an answer, record the
    /// query, mirror it, and return the full record.
    ///
    /// A mirror failure fails the whole operation and rolls the record back
    /// out of the in-memory store, so callers never see a query that was
    /// not durably recorded.
    #[instrument(skip(self, question))]
    pub async fn submit_query(&self, question: String) -> Result<QueryRecord, ServiceError> {
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(ServiceError::Validation("question must not be empty".into()));
        }

        let ranked = self
            .catalog
            .search(&question, self.top_k)
            .await
            .map_err(ServiceError::Upstream)?;
        if ranked.is_empty() {
            return Err(ServiceError::NotFound("no experts matched the query".into()));
        }

        let llm_answer = self
            .generator
            .generate(&question)
            .await
            .map_err(ServiceError::Upstream)?;

        let record = QueryRecord {
            id: Uuid::new_v4(),
            question,
            assigned_experts: ranked
                .into_iter()
                .map(|hit| AssignedExpert {
                    id: hit.expert.id,
                    name: hit.expert.name,
                    expertise: hit.expert.expertise,
                    description: hit.expert.description,
                    similarity_score: hit.similarity_score,
                })
                .collect(),
            llm_answer,
            expert_responses: Vec::new(),
        };

        self.store.insert(record.clone());
        if let Err(e) = self.durable.record_query(&record).await {
            self.store.remove(record.id);
            return Err(ServiceError::Persistence(e));
        }

        info!(query_id = %record.id, experts = record.assigned_experts.len(), "query submitted");
        Ok(record)
    }

    /// Append an expert response and push it to every live subscriber.
    ///
    /// The in-memory append is the serialization point. A mirror failure is
    /// logged but does not undo the append or suppress the broadcast: the
    /// live-delivery guarantee outranks durability for this operation.
    #[instrument(skip(self, response_text))]
    pub async fn submit_expert_response(
        &self,
        query_id: Uuid,
        expert_id: String,
        expert_name: String,
        response_text: String,
    ) -> Result<ExpertResponse, ServiceError> {
        let response = ExpertResponse {
            expert_id,
            expert_name,
            response: response_text,
            submitted_at: Utc::now(),
        };

        let appended = self
            .store
            .append_response(query_id, response)
            .ok_or_else(|| ServiceError::NotFound(format!("unknown query id {query_id}")))?;

        if let Err(e) = self.durable.record_response(query_id, &appended).await {
            error!(%query_id, "durable mirror failed for expert response: {e:#}");
        }

        self.registry
            .broadcast(query_id, &PushEvent::ExpertResponse(appended.clone()));

        Ok(appended)
    }

    pub fn get_query(&self, query_id: Uuid) -> Result<QueryRecord, ServiceError> {
        self.store
            .get(query_id)
            .ok_or_else(|| ServiceError::NotFound(format!("unknown query id {query_id}")))
    }

    pub fn list_queries(&self) -> Vec<QuerySummary> {
        self.store.list()
    }

    pub fn list_queries_with_responses(&self) -> Vec<QueryRecord> {
        self.store.list_with_responses()
    }

    /// Empty the in-memory query store.
    ///
    /// The durable mirror is deliberately left untouched; resynchronizing
    /// it is out of scope, and the resulting divergence is a documented
    /// property of the bulk clear.
    pub fn clear_all(&self) -> usize {
        let cleared = self.store.len();
        self.store.clear();
        warn!(cleared, "cleared in-memory query store; durable mirror untouched");
        cleared
    }

    pub fn query_count(&self) -> usize {
        self.store.len()
    }

    // --- expert management, delegated to the catalog ---

    pub async fn add_expert(
        &self,
        name: String,
        expertise: String,
        description: String,
    ) -> Result<Expert, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("expert name must not be empty".into()));
        }
        let expert = Expert {
            id: Uuid::new_v4().to_string(),
            name,
            expertise,
            description,
        };
        self.catalog
            .add(expert.clone())
            .await
            .map_err(ServiceError::Upstream)?;
        info!(expert_id = %expert.id, "expert added to catalog");
        Ok(expert)
    }

    pub async fn list_experts(&self) -> Result<Vec<Expert>, ServiceError> {
        self.catalog.list().await.map_err(ServiceError::Upstream)
    }

    pub async fn collection_info(&self) -> Result<CatalogInfo, ServiceError> {
        self.catalog.info().await.map_err(ServiceError::Upstream)
    }

    pub async fn clear_experts(&self) -> Result<(), ServiceError> {
        self.catalog.clear().await.map_err(ServiceError::Upstream)
    }
}
