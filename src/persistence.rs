//! Durable mirror of the in-memory query store.
//!
//! Persistence here is advisory: the in-memory state change is authoritative
//! and the mirror follows it. How mirror failures are handled is decided per
//! operation by the query service, not swallowed here.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use crate::store::{ExpertResponse, QueryRecord};

/// Best-effort mirror of query creation and response appends.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn record_query(&self, record: &QueryRecord) -> Result<()>;

    async fn record_response(&self, query_id: Uuid, response: &ExpertResponse) -> Result<()>;
}

/// Mirror backed by an embedded sled tree, one JSON document per query.
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree("queries")?;
        Ok(Self { tree })
    }

    /// Read back a mirrored record. Used by tests and operational tooling;
    /// the service never reads through the mirror.
    pub fn fetch(&self, query_id: Uuid) -> Result<Option<QueryRecord>> {
        match self.tree.get(query_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DurableStore for SledStore {
    async fn record_query(&self, record: &QueryRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.tree.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    async fn record_response(&self, query_id: Uuid, response: &ExpertResponse) -> Result<()> {
        let Some(raw) = self.tree.get(query_id.as_bytes())? else {
            bail!("query {query_id} is missing from the durable store");
        };
        let mut record: QueryRecord = serde_json::from_slice(&raw)?;
        record.expert_responses.push(response.clone());
        self.tree.insert(query_id.as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(())
    }
}

/// Mirror that records nothing. Used when mirroring is disabled and in
/// tests that do not exercise persistence.
pub struct NoopStore;

#[async_trait]
impl DurableStore for NoopStore {
    async fn record_query(&self, _record: &QueryRecord) -> Result<()> {
        Ok(())
    }

    async fn record_response(&self, _query_id: Uuid, _response: &ExpertResponse) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record() -> QueryRecord {
        QueryRecord {
            id: Uuid::new_v4(),
            question: "who knows water purification".into(),
            assigned_experts: vec![],
            llm_answer: "Water purification involves...".into(),
            expert_responses: vec![],
        }
    }

    #[tokio::test]
    async fn mirrored_query_round_trips() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let rec = record();
        store.record_query(&rec).await.unwrap();

        let fetched = store.fetch(rec.id).unwrap().unwrap();
        assert_eq!(fetched.question, rec.question);
        assert_eq!(fetched.llm_answer, rec.llm_answer);
    }

    #[tokio::test]
    async fn mirrored_responses_accumulate_in_order() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let rec = record();
        store.record_query(&rec).await.unwrap();

        for i in 0..3 {
            let response = ExpertResponse {
                expert_id: "e1".into(),
                expert_name: "Jane".into(),
                response: format!("answer {i}"),
                submitted_at: Utc::now(),
            };
            store.record_response(rec.id, &response).await.unwrap();
        }

        let fetched = store.fetch(rec.id).unwrap().unwrap();
        assert_eq!(fetched.expert_responses.len(), 3);
        assert_eq!(fetched.expert_responses[2].response, "answer 2");
    }

    #[tokio::test]
    async fn response_mirror_for_unknown_query_fails() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let response = ExpertResponse {
            expert_id: "e1".into(),
            expert_name: "Jane".into(),
            response: "orphan".into(),
            submitted_at: Utc::now(),
        };
        assert!(store.record_response(Uuid::new_v4(), &response).await.is_err());
    }
}
