//! Retrieval-Answering 파이프라인
//!
//! 세션 인덱스에서 상위 k개 패시지를 검색하고, 요청 세션의 것만 남긴 뒤
//! 답변 모델을 호출하고 인용 메타데이터(문서, 페이지, 신뢰도)를 계산합니다.

use std::sync::Arc;

use serde::Serialize;

use crate::answer::AnswerModel;
use crate::error::{RagError, Result};
use crate::knowledge::{Passage, ScoredPassage, SessionStore};

/// 점수가 하나도 없을 때의 신뢰도
pub const DEFAULT_CONFIDENCE: f32 = 0.8;

/// 문서 이름을 알 수 없을 때
pub const UNKNOWN_FILENAME: &str = "Unknown";

// ============================================================================
// Types
// ============================================================================

/// 인용 출처 (페이지별 하나)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub page: u32,
    pub snippet: String,
}

/// 질의 결과
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// 답변 텍스트
    pub answer: String,
    /// 대표 인용 페이지 (가장 낮은 번호)
    pub page_number: Option<u32>,
    /// 인용된 서로 다른 페이지 수
    pub total_pages: usize,
    /// 인용 페이지 (오름차순)
    pub pages: Vec<u32>,
    /// 출처 문서 이름
    pub filename: String,
    /// 0.0 ~ 1.0
    pub confidence: f32,
    pub sources: Vec<Source>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// 질의 파이프라인
pub struct RetrievalPipeline {
    store: Arc<SessionStore>,
    model: Arc<dyn AnswerModel>,
    top_k: usize,
}

impl RetrievalPipeline {
    pub fn new(store: Arc<SessionStore>, model: Arc<dyn AnswerModel>, top_k: usize) -> Self {
        Self {
            store,
            model,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// 세션 문서로 질문에 답변
    ///
    /// 빈 질문은 외부 호출 전에 `EmptyQuestion`으로 거부됩니다.
    /// 활성 인덱스가 없으면 `NoActiveSession`.
    pub async fn answer(&self, session_id: &str, question: &str) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        // 1. 세션 인덱스 확보 + 활동 시각 갱신
        let session = self.store.read(session_id).await?;
        self.store.touch(session_id);

        // 2. 상위 k개 검색
        let retrieved = session.index().query(question, self.top_k).await?;
        let last_document = session.documents().last().cloned();
        drop(session);

        // 3. 세션 필터
        let scored = filter_to_session(session_id, retrieved);
        let passages: Vec<Passage> = scored.iter().map(|s| s.passage.clone()).collect();

        // 4-5. 답변 생성 (빈 문맥이면 모델이 "not found" 응답)
        let answer = self.model.complete(question, &passages).await?;

        // 6-7. 인용 + 신뢰도
        let pages = cited_pages(&passages);
        let filename = passages
            .first()
            .map(|p| p.document.clone())
            .or(last_document)
            .unwrap_or_else(|| UNKNOWN_FILENAME.to_string());

        let result = RetrievalResult {
            answer,
            page_number: pages.first().copied(),
            total_pages: pages.len(),
            sources: sources(&passages),
            filename,
            confidence: confidence(&scored),
            pages,
        };

        tracing::info!(
            "Answered question for session {} ({} passages, pages {:?}, confidence {:.2})",
            session_id,
            scored.len(),
            result.pages,
            result.confidence
        );

        Ok(result)
    }
}

/// 다른 세션 ID가 붙은 패시지 제거
fn filter_to_session(session_id: &str, retrieved: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
    retrieved
        .into_iter()
        .filter(|s| {
            let keep = s.passage.session_id == session_id;
            if !keep {
                tracing::warn!(
                    "Discarding passage from session {} returned for session {} ({} p.{})",
                    s.passage.session_id,
                    session_id,
                    s.passage.document,
                    s.passage.page_number
                );
            }
            keep
        })
        .collect()
}

/// 서로 다른 페이지 번호 (오름차순)
fn cited_pages(passages: &[Passage]) -> Vec<u32> {
    let mut pages: Vec<u32> = passages.iter().map(|p| p.page_number).collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

/// 페이지별 첫 패시지의 스니펫 (페이지 오름차순)
fn sources(passages: &[Passage]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for passage in passages {
        if !sources.iter().any(|s| s.page == passage.page_number) {
            sources.push(Source {
                page: passage.page_number,
                snippet: passage.snippet.clone(),
            });
        }
    }
    sources.sort_by_key(|s| s.page);
    sources
}

/// 거리 점수 평균으로 신뢰도 계산
///
/// 패시지별 `clamp(1 - distance, 0, 1)`의 평균. 점수가 없으면 `DEFAULT_CONFIDENCE`.
fn confidence(scored: &[ScoredPassage]) -> f32 {
    let values: Vec<f32> = scored
        .iter()
        .filter_map(|s| s.score)
        .filter(|d| d.is_finite())
        .map(|d| (1.0 - d).clamp(0.0, 1.0))
        .collect();

    if values.is_empty() {
        return DEFAULT_CONFIDENCE;
    }

    let mean = values.iter().sum::<f32>() / values.len() as f32;
    mean.clamp(0.0, 1.0)
}

// ============================================================================
// Tests
// ============================================================================
