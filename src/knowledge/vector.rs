//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 유사도 검색 엔진 자체는 교체 가능한 구현(메모리, LanceDB)에 맡기고,
//! 세션 코어는 이 트레이트만 사용합니다.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::passage::Passage;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 패시지 (출처 메타데이터 포함)
    pub passage: Passage,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub passage: Passage,
    /// 코사인 거리 (0.0 = 동일, 낮을수록 유사). 엔진이 점수를 주지 않으면 None
    pub distance: Option<f32>,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 한 인스턴스는 한 세션의 저장 공간만 담당합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입 (한 번에 커밋)
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 벡터 검색 (거리 오름차순)
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;

    /// 저장 공간을 물리적으로 삭제
    async fn destroy(&self) -> Result<()>;

    /// 엔진 이름
    fn name(&self) -> &'static str;
}

/// 세션마다 새 VectorStore를 만드는 팩토리
#[async_trait]
pub trait VectorStoreFactory: Send + Sync {
    /// 잔여 상태가 없는 새 저장소 생성
    async fn create(&self, session_id: &str) -> Result<Arc<dyn VectorStore>>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 0벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
        assert!(cosine_distance(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatch() {
        let a: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &a), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
