//! 에러 타입 - 세션 RAG 코어의 실패 분류
//!
//! 수집(ingest)과 질의(query) 실패는 `kind + message` 형태의 구조화된
//! 실패로 호출자에게 전달됩니다. 스위퍼 실패는 세션 단위로 격리됩니다.

use serde::Serialize;
use thiserror::Error;

/// 코어 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;

/// 세션 RAG 에러
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    /// 추출 가능한 텍스트가 없음 (손상/암호화/스캔 문서)
    #[error("No extractable text in document: {0}")]
    DocumentEmpty(String),

    /// 문서 바이트를 읽을 수 없음
    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),

    /// 세션에 활성 인덱스가 없음 (먼저 문서를 수집해야 함)
    #[error("No active session index for session: {0}")]
    NoActiveSession(String),

    /// 세션이 저장소에 존재하지 않음
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 빈 질문
    #[error("Question is empty")]
    EmptyQuestion,

    /// 임베딩 서비스 실패
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 답변 모델 실패
    #[error("Answer model unavailable: {0}")]
    ModelUnavailable(String),

    /// 외부 서비스 rate limit
    #[error("Rate limited by external service: {0}")]
    RateLimited(String),

    /// 인덱스 저장소 생성/삭제 실패
    #[error("Storage error: {0}")]
    Storage(String),

    /// 잘못된 설정 값
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RagError {
    /// 로깅 및 API 응답용 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            RagError::DocumentEmpty(_) => "DOCUMENT_EMPTY",
            RagError::UnreadableDocument(_) => "UNREADABLE_DOCUMENT",
            RagError::NoActiveSession(_) => "NO_ACTIVE_SESSION",
            RagError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RagError::EmptyQuestion => "EMPTY_QUESTION",
            RagError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            RagError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            RagError::RateLimited(_) => "RATE_LIMITED",
            RagError::Storage(_) => "STORAGE_ERROR",
            RagError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// 호출자가 재시도할 수 있는 실패인지 (코어는 재시도하지 않음)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_)
                | RagError::ModelUnavailable(_)
                | RagError::RateLimited(_)
        )
    }

    /// 사용자에게 보여줄 메시지
    pub fn user_message(&self) -> String {
        match self {
            RagError::DocumentEmpty(_) | RagError::UnreadableDocument(_) => {
                "Could not extract text from the document. The file might be corrupted or password-protected.".to_string()
            }
            RagError::NoActiveSession(_) | RagError::SessionNotFound(_) => {
                "Please upload a document first".to_string()
            }
            RagError::EmptyQuestion => "No message provided".to_string(),
            RagError::RateLimited(_) => {
                "Too many requests to the model service. Please try again shortly.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// 직렬화 가능한 실패 본문
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.code(),
            message: self.user_message(),
            retryable: self.is_retryable(),
        }
    }
}

/// 호출자(HTTP 레이어 등)에 전달하는 구조화된 실패
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

// ============================================================================
// Tests
// ============================================================================
