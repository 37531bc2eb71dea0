use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use concierge_core::config::PolicyConfig;
use concierge_core::knowledge::{summarize, KnowledgeBase, KnowledgeSection};

use crate::llm::{cosine_similarity, EmbeddingClient, LlmError};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievalSettings {
    pub similarity_threshold: f32,
    pub snippet_max_chars: usize,
}

impl RetrievalSettings {
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self {
            similarity_threshold: policy.similarity_threshold,
            snippet_max_chars: policy.snippet_max_chars,
        }
    }
}

/// Two-tier lookup over the clinic corpus: embedding similarity first, the
/// keyword scorer when that yields nothing.
pub struct Retriever {
    corpus: Arc<KnowledgeBase>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    settings: RetrievalSettings,
    section_vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl Retriever {
    pub fn new(
        corpus: Arc<KnowledgeBase>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self { corpus, embedder, settings, section_vectors: RwLock::new(HashMap::new()) }
    }

    pub fn keyword_only(corpus: Arc<KnowledgeBase>, settings: RetrievalSettings) -> Self {
        Self::new(corpus, None, settings)
    }

    pub async fn retrieve(&self, query: &str) -> Option<String> {
        if query.trim().is_empty() || self.corpus.is_empty() {
            return None;
        }

        match self.semantic(query).await {
            Ok(Some(snippet)) => return Some(snippet),
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "retrieval.semantic.failed",
                error = %error,
                "semantic retrieval failed; using keyword scoring"
            ),
        }

        self.corpus.search_keywords(query, self.settings.snippet_max_chars)
    }

    async fn semantic(&self, query: &str) -> Result<Option<String>, LlmError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let Some(query_vector) = embedder.embed(query).await? else {
            return Ok(None);
        };

        let mut best: Option<(&KnowledgeSection, f32)> = None;
        for section in self.corpus.sections() {
            let Some(section_vector) = self.section_vector(embedder.as_ref(), section).await?
            else {
                continue;
            };
            let score = cosine_similarity(&query_vector, &section_vector);
            if score > best.map_or(0.0, |(_, top)| top) {
                best = Some((section, score));
            }
        }

        match best {
            Some((section, score)) if score > self.settings.similarity_threshold => {
                debug!(
                    event_name = "retrieval.semantic.hit",
                    section = %section.name,
                    score,
                    "semantic retrieval matched a section"
                );
                Ok(Some(summarize(section, self.settings.snippet_max_chars)))
            }
            _ => {
                debug!(
                    event_name = "retrieval.semantic.below_threshold",
                    best_score = best.map_or(0.0, |(_, score)| score),
                    "no section passed the similarity threshold"
                );
                Ok(None)
            }
        }
    }

    async fn section_vector(
        &self,
        embedder: &dyn EmbeddingClient,
        section: &KnowledgeSection,
    ) -> Result<Option<Vec<f32>>, LlmError> {
        if let Some(vector) = self.section_vectors.read().await.get(&section.name) {
            return Ok(Some(vector.clone()));
        }
        let vector = embedder.embed(&section.text).await?;
        if let Some(vector) = &vector {
            self.section_vectors.write().await.insert(section.name.clone(), vector.clone());
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use concierge_core::config::AppConfig;
    use concierge_core::knowledge::KnowledgeBase;

    use super::{RetrievalSettings, Retriever};
    use crate::llm::{LlmError, ScriptedEmbedder};

    fn corpus() -> Arc<KnowledgeBase> {
        Arc::new(KnowledgeBase::from_json(json!({
            "pricing": [
                {"name": "슈링크 유니버스", "price_krw": 199000},
                {"name": "인모드 리프팅", "price_krw": 250000}
            ],
            "clinic": "주차는 건물 지하 2층에서 2시간 무료입니다.",
        })))
    }

    fn settings() -> RetrievalSettings {
        RetrievalSettings::from_policy(&AppConfig::default().policy)
    }

    #[tokio::test]
    async fn semantic_match_above_threshold_wins() {
        let embedder = ScriptedEmbedder::default()
            .rule("차 댈", vec![0.0, 1.0])
            .rule("주차", vec![0.1, 0.99])
            .rule("슈링크", vec![1.0, 0.0]);
        let retriever = Retriever::new(corpus(), Some(Arc::new(embedder)), settings());

        let snippet = retriever.retrieve("차 댈 곳 있나요").await;

        assert_eq!(snippet.as_deref(), Some("주차는 건물 지하 2층에서 2시간 무료입니다."));
    }

    #[tokio::test]
    async fn low_similarity_falls_back_to_keywords() {
        let embedder = ScriptedEmbedder::default()
            .rule("가격", vec![1.0, 1.0])
            .rule("주차", vec![1.0, -1.0])
            .rule("슈링크", vec![-1.0, 1.0]);
        let retriever = Retriever::new(corpus(), Some(Arc::new(embedder)), settings());

        let snippet = retriever.retrieve("인모드 가격").await.expect("keyword tier matches");

        assert!(snippet.contains("인모드 리프팅: 250,000원"));
    }

    #[tokio::test]
    async fn embedding_failure_falls_back_to_keywords() {
        let embedder =
            ScriptedEmbedder::failing(LlmError::Status { status: 503, body: String::new() });
        let retriever = Retriever::new(corpus(), Some(Arc::new(embedder)), settings());

        assert!(retriever.retrieve("주차 가능한가요").await.is_some());
    }

    #[tokio::test]
    async fn nothing_relevant_yields_none() {
        let retriever = Retriever::keyword_only(corpus(), settings());

        assert_eq!(retriever.retrieve("영업시간").await, None);
        assert_eq!(retriever.retrieve("  ").await, None);
        let empty = Retriever::keyword_only(Arc::new(KnowledgeBase::default()), settings());
        assert_eq!(empty.retrieve("슈링크 가격").await, None);
    }
}
