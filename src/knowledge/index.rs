//! 세션 인덱스 - 세션 범위 벡터 검색 파사드
//!
//! 외부 유사도 엔진(`VectorStore`) 위의 얇은 계층입니다.
//! 저장되는 모든 패시지가 소유 세션 ID를 갖도록 보장합니다.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::passage::Passage;
use super::vector::{VectorEntry, VectorStore};

/// 검색된 패시지와 거리 점수
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// 코사인 거리 (낮을수록 유사)
    pub score: Option<f32>,
}

/// 한 세션이 독점 소유하는 인덱스
pub struct SessionIndex {
    session_id: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for SessionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIndex")
            .field("session_id", &self.session_id)
            .field("store", &self.store.name())
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

impl SessionIndex {
    /// 새로 만든(비어 있는) 저장소로 인덱스 생성
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            embedder,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 패시지 삽입
    ///
    /// 모든 임베딩을 먼저 계산한 뒤 한 번에 저장하므로, 임베딩 실패 시
    /// 인덱스는 변경되지 않습니다. 세션 ID는 이 인덱스의 것으로 덮어씁니다.
    pub async fn insert(&self, passages: Vec<Passage>) -> Result<usize> {
        if passages.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != passages.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                embeddings.len()
            )));
        }

        let entries: Vec<VectorEntry> = passages
            .into_iter()
            .zip(embeddings)
            .map(|(mut passage, embedding)| {
                if passage.session_id != self.session_id {
                    tracing::debug!(
                        "Re-tagging passage from session {} to {}",
                        passage.session_id,
                        self.session_id
                    );
                    passage.session_id = self.session_id.clone();
                }
                VectorEntry { passage, embedding }
            })
            .collect();

        self.store.insert_batch(&entries).await
    }

    /// 상위 k개 패시지 검색 (거리 오름차순)
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        let embedding = self.embedder.embed(text).await?;
        let results = self.store.search(&embedding, k).await?;

        Ok(results
            .into_iter()
            .map(|r| ScoredPassage {
                passage: r.passage,
                score: r.distance,
            })
            .collect())
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// 저장 공간 물리 삭제
    pub async fn destroy(&self) -> Result<()> {
        self.store.destroy().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedding;
    use crate::knowledge::MemoryVectorStore;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::EmbeddingUnavailable("offline".into()))
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn passage(text: &str, session: &str) -> Passage {
        Passage {
            text: text.to_string(),
            document: "a.pdf".to_string(),
            page_number: 1,
            snippet: text.to_string(),
            session_id: session.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_stamps_owning_session() {
        let index = SessionIndex::new(
            "owner",
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashingEmbedding::new(64)),
        );

        index
            .insert(vec![passage("alpha beta", "owner"), passage("gamma delta", "intruder")])
            .await
            .unwrap();

        let results = index.query("gamma delta", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passage.session_id == "owner"));
        assert_eq!(results[0].passage.text, "gamma delta");
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_index_untouched() {
        let index = SessionIndex::new(
            "owner",
            Arc::new(MemoryVectorStore::new()),
            Arc::new(FailingEmbedder),
        );

        let err = index.insert(vec![passage("x y", "owner")]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
