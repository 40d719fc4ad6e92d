//! Expert catalog collaborator: ranked similarity search plus expert
//! management.
//!
//! The real vector index is an external concern behind the [`ExpertCatalog`]
//! trait. The built-in [`LexicalCatalog`] ranks experts by token overlap
//! between the query and each expert's expertise/description text, which is
//! enough for local development and tests.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Catalog entity. Similarity scores are computed per-query, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: String,
    pub name: String,
    pub expertise: String,
    pub description: String,
}

/// One search hit: the expert plus its score for the query at hand.
#[derive(Debug, Clone, Serialize)]
pub struct RankedExpert {
    #[serde(flatten)]
    pub expert: Expert,
    pub similarity_score: f32,
}

/// Collection-level metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogInfo {
    pub name: String,
    pub expert_count: usize,
    pub metadata: HashMap<String, String>,
}

/// Narrow request/response contract over the expert population.
#[async_trait]
pub trait ExpertCatalog: Send + Sync {
    /// Top-k experts ranked by similarity to `query`, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedExpert>>;

    async fn add(&self, expert: Expert) -> Result<()>;

    async fn list(&self) -> Result<Vec<Expert>>;

    async fn info(&self) -> Result<CatalogInfo>;

    /// Remove every expert from the collection.
    async fn clear(&self) -> Result<()>;
}

/// Seed file entry; the id is assigned on insert when absent.
#[derive(Debug, Deserialize)]
pub struct SeedExpert {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub expertise: String,
    pub description: String,
}

/// In-process catalog backed by token-overlap scoring.
pub struct LexicalCatalog {
    name: String,
    experts: DashMap<String, Expert>,
}

impl LexicalCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            experts: DashMap::new(),
        }
    }

    /// Load experts from a JSON seed file (an array of name/expertise/
    /// description objects).
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seeds: Vec<SeedExpert> = serde_json::from_str(&raw)?;
        let count = seeds.len();
        for seed in seeds {
            let expert = Expert {
                id: seed.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                name: seed.name,
                expertise: seed.expertise,
                description: seed.description,
            };
            self.experts.insert(expert.id.clone(), expert);
        }
        info!(count, path = %path.display(), "seeded expert catalog");
        Ok(count)
    }

    fn tokenize(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Word-overlap score between the query and the expert's combined
    /// expertise + description text (intersection over union).
    fn score(query_tokens: &HashSet<String>, expert: &Expert) -> f32 {
        let expert_tokens = Self::tokenize(&format!("{} {}", expert.expertise, expert.description));
        if expert_tokens.is_empty() || query_tokens.is_empty() {
            return 0.0;
        }
        let overlap = query_tokens.intersection(&expert_tokens).count();
        let union = query_tokens.union(&expert_tokens).count();
        overlap as f32 / union as f32
    }
}

#[async_trait]
impl ExpertCatalog for LexicalCatalog {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedExpert>> {
        let query_tokens = Self::tokenize(query);

        let mut ranked: Vec<RankedExpert> = self
            .experts
            .iter()
            .map(|entry| {
                let expert = entry.value().clone();
                let similarity_score = Self::score(&query_tokens, &expert);
                RankedExpert {
                    expert,
                    similarity_score,
                }
            })
            .collect();

        // Best first; ties broken by id for a deterministic ordering.
        ranked.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.expert.id.cmp(&b.expert.id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    async fn add(&self, expert: Expert) -> Result<()> {
        self.experts.insert(expert.id.clone(), expert);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Expert>> {
        Ok(self.experts.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn info(&self) -> Result<CatalogInfo> {
        Ok(CatalogInfo {
            name: self.name.clone(),
            expert_count: self.experts.len(),
            metadata: HashMap::from([("scoring".to_string(), "token_overlap".to_string())]),
        })
    }

    async fn clear(&self) -> Result<()> {
        self.experts.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expert(id: &str, expertise: &str, description: &str) -> Expert {
        Expert {
            id: id.to_string(),
            name: format!("Expert {id}"),
            expertise: expertise.to_string(),
            description: description.to_string(),
        }
    }

    async fn catalog_with(experts: Vec<Expert>) -> LexicalCatalog {
        let catalog = LexicalCatalog::new("experts");
        for e in experts {
            catalog.add(e).await.unwrap();
        }
        catalog
    }

    #[tokio::test]
    async fn search_ranks_by_overlap() {
        let catalog = catalog_with(vec![
            expert("e1", "water purification", "field water treatment systems"),
            expert("e2", "solar power", "off-grid solar installations"),
        ])
        .await;

        let ranked = catalog.search("who knows water purification", 5).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].expert.id, "e1");
        assert!(ranked[0].similarity_score > ranked[1].similarity_score);
    }

    #[tokio::test]
    async fn search_truncates_to_top_k() {
        let catalog = catalog_with(
            (0..10)
                .map(|i| expert(&format!("e{i}"), "medicine", "clinical care"))
                .collect(),
        )
        .await;

        let ranked = catalog.search("medicine", 5).await.unwrap();
        assert_eq!(ranked.len(), 5);
    }

    #[tokio::test]
    async fn empty_catalog_returns_no_hits() {
        let catalog = LexicalCatalog::new("experts");
        let ranked = catalog.search("anything", 5).await.unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_collection() {
        let catalog = catalog_with(vec![expert("e1", "logistics", "supply chains")]).await;
        assert_eq!(catalog.info().await.unwrap().expert_count, 1);
        catalog.clear().await.unwrap();
        assert_eq!(catalog.info().await.unwrap().expert_count, 0);
    }

    #[tokio::test]
    async fn seed_file_populates_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experts.json");
        tokio::fs::write(
            &path,
            r#"[
                {"name": "Jane Doe", "expertise": "ML", "description": "ten years of ML"},
                {"id": "fixed", "name": "Omar", "expertise": "solar", "description": "off-grid"}
            ]"#,
        )
        .await
        .unwrap();

        let catalog = LexicalCatalog::new("experts");
        let count = catalog.seed_from_file(&path).await.unwrap();
        assert_eq!(count, 2);

        let experts = catalog.list().await.unwrap();
        assert_eq!(experts.len(), 2);
        assert!(experts.iter().any(|e| e.id == "fixed"));
    }

    #[test]
    fn tokenizer_is_case_insensitive_and_splits_punctuation() {
        let tokens = LexicalCatalog::tokenize("Water-Purification, AND water!");
        assert!(tokens.contains("water"));
        assert!(tokens.contains("purification"));
        assert!(tokens.contains("and"));
        assert_eq!(tokens.len(), 3);
    }
}
