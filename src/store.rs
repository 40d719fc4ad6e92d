//! In-memory table of submitted queries and their accumulated expert responses.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An expert assigned to a query, snapshotted at assignment time.
///
/// The similarity score is the value computed when the query was submitted;
/// it is never refreshed against the catalog afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedExpert {
    pub id: String,
    pub name: String,
    pub expertise: String,
    pub description: String,
    pub similarity_score: f32,
}

/// A single expert submission against a query. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertResponse {
    pub expert_id: String,
    pub expert_name: String,
    pub response: String,
    /// Server-side capture time, not client-supplied.
    pub submitted_at: DateTime<Utc>,
}

/// One question submission and everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub question: String,
    /// Fixed at creation, never mutated after submission.
    pub assigned_experts: Vec<AssignedExpert>,
    pub llm_answer: String,
    /// Append-only, ordered by arrival; never reordered or deduplicated.
    pub expert_responses: Vec<ExpertResponse>,
}

/// Lightweight listing view: identity, question, and assigned experts,
/// without the response history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySummary {
    pub id: Uuid,
    pub question: String,
    pub assigned_experts: Vec<AssignedExpert>,
}

impl QueryRecord {
    fn summary(&self) -> QuerySummary {
        QuerySummary {
            id: self.id,
            question: self.question.clone(),
            assigned_experts: self.assigned_experts.clone(),
        }
    }
}

/// Process-wide table of query records, safe under concurrent mutation.
#[derive(Default)]
pub struct QueryStore {
    queries: DashMap<Uuid, QueryRecord>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: QueryRecord) {
        self.queries.insert(record.id, record);
    }

    pub fn remove(&self, query_id: Uuid) -> Option<QueryRecord> {
        self.queries.remove(&query_id).map(|(_, record)| record)
    }

    /// Snapshot lookup of a full record.
    pub fn get(&self, query_id: Uuid) -> Option<QueryRecord> {
        self.queries.get(&query_id).map(|entry| entry.value().clone())
    }

    /// Append a response to a query's sequence.
    ///
    /// The append happens under the record's shard lock, so two concurrent
    /// appends on the same query both land exactly once. Returns `None` when
    /// the query id is unknown.
    pub fn append_response(
        &self,
        query_id: Uuid,
        response: ExpertResponse,
    ) -> Option<ExpertResponse> {
        let mut entry = self.queries.get_mut(&query_id)?;
        entry.expert_responses.push(response.clone());
        Some(response)
    }

    pub fn list(&self) -> Vec<QuerySummary> {
        self.queries.iter().map(|entry| entry.summary()).collect()
    }

    pub fn list_with_responses(&self) -> Vec<QueryRecord> {
        self.queries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Bulk clear of the in-memory table. The durable mirror is untouched.
    pub fn clear(&self) {
        self.queries.clear();
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(question: &str) -> QueryRecord {
        QueryRecord {
            id: Uuid::new_v4(),
            question: question.to_string(),
            assigned_experts: vec![],
            llm_answer: String::new(),
            expert_responses: vec![],
        }
    }

    fn response(expert_id: &str, text: &str) -> ExpertResponse {
        ExpertResponse {
            expert_id: expert_id.to_string(),
            expert_name: format!("Expert {expert_id}"),
            response: text.to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn sequential_appends_preserve_call_order() {
        let store = QueryStore::new();
        let rec = record("who knows water purification");
        let id = rec.id;
        store.insert(rec);

        for i in 0..5 {
            store
                .append_response(id, response("e1", &format!("answer {i}")))
                .unwrap();
        }

        let responses = store.get(id).unwrap().expert_responses;
        assert_eq!(responses.len(), 5);
        for (i, resp) in responses.iter().enumerate() {
            assert_eq!(resp.response, format!("answer {i}"));
        }
    }

    #[test]
    fn append_to_unknown_query_returns_none() {
        let store = QueryStore::new();
        assert!(store.append_response(Uuid::new_v4(), response("e1", "x")).is_none());
    }

    #[tokio::test]
    async fn concurrent_appends_both_land_exactly_once() {
        let store = Arc::new(QueryStore::new());
        let rec = record("q");
        let id = rec.id;
        store.insert(rec);

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store.append_response(id, response("e1", "first")).unwrap();
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store.append_response(id, response("e2", "second")).unwrap();
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let responses = store.get(id).unwrap().expert_responses;
        assert_eq!(responses.len(), 2);
        let firsts = responses.iter().filter(|r| r.response == "first").count();
        let seconds = responses.iter().filter(|r| r.response == "second").count();
        assert_eq!(firsts, 1);
        assert_eq!(seconds, 1);
    }

    #[test]
    fn clear_removes_all_records() {
        let store = QueryStore::new();
        let ids: Vec<Uuid> = (0..3)
            .map(|i| {
                let rec = record(&format!("question {i}"));
                let id = rec.id;
                store.insert(rec);
                id
            })
            .collect();

        assert_eq!(store.len(), 3);
        store.clear();
        assert!(store.is_empty());
        for id in ids {
            assert!(store.get(id).is_none());
        }
    }

    #[test]
    fn listing_view_omits_response_history() {
        let store = QueryStore::new();
        let mut rec = record("q");
        rec.assigned_experts.push(AssignedExpert {
            id: "e1".into(),
            name: "Jane".into(),
            expertise: "ML".into(),
            description: "ten years of ML".into(),
            similarity_score: 0.9,
        });
        let id = rec.id;
        store.insert(rec);
        store.append_response(id, response("e1", "hello")).unwrap();

        let summaries = store.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].assigned_experts.len(), 1);

        let full = store.list_with_responses();
        assert_eq!(full[0].expert_responses.len(), 1);
    }
}
