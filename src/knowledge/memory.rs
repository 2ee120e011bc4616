//! 메모리 벡터 저장소
//!
//! 세션 하나의 벡터를 프로세스 메모리에 보관하고 brute-force 코사인 거리로
//! 검색합니다. 테스트와 단일 프로세스 배포에 사용합니다.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{RagError, Result};

use super::vector::{cosine_distance, SearchResult, VectorEntry, VectorStore, VectorStoreFactory};

/// 메모리 벡터 저장소
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> RagError {
    RagError::Storage(format!("Lock error: {}", e))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut stored = self.entries.write().map_err(lock_error)?;
        stored.extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let stored = self.entries.read().map_err(lock_error)?;

        let mut scored: Vec<SearchResult> = stored
            .iter()
            .map(|entry| SearchResult {
                passage: entry.passage.clone(),
                distance: Some(cosine_distance(query_embedding, &entry.embedding)),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .unwrap_or(f32::MAX)
                .partial_cmp(&b.distance.unwrap_or(f32::MAX))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(lock_error)?.len())
    }

    async fn destroy(&self) -> Result<()> {
        let mut stored = self.entries.write().map_err(lock_error)?;
        stored.clear();
        stored.shrink_to_fit();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// 세션마다 빈 메모리 저장소를 생성
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreFactory;

#[async_trait]
impl VectorStoreFactory for MemoryStoreFactory {
    async fn create(&self, _session_id: &str) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(MemoryVectorStore::new()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Passage;

    fn entry(text: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            passage: Passage {
                text: text.to_string(),
                document: "doc.pdf".to_string(),
                page_number: 1,
                snippet: text.to_string(),
                session_id: "s1".to_string(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_memory_search_orders_by_distance() {
        let store = MemoryVectorStore::new();
        store
            .insert_batch(&[
                entry("far", vec![0.0, 1.0]),
                entry("near", vec![1.0, 0.1]),
                entry("exact", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage.text, "exact");
        assert_eq!(results[1].passage.text, "near");
        assert!(results[0].distance.unwrap() <= results[1].distance.unwrap());
    }

    #[tokio::test]
    async fn test_memory_destroy() {
        let store = MemoryVectorStore::new();
        store.insert_batch(&[entry("a", vec![1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.destroy().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_factory_creates_fresh_stores() {
        let factory = MemoryStoreFactory;
        let first = factory.create("s1").await.unwrap();
        first.insert_batch(&[entry("a", vec![1.0])]).await.unwrap();

        let second = factory.create("s1").await.unwrap();
        assert_eq!(second.count().await.unwrap(), 0);
    }
}
