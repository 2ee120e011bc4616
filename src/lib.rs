//! session-rag - 세션 격리 문서 Q&A RAG 엔진
//!
//! 업로드된 문서를 겹치는 패시지로 나눠 세션별 벡터 인덱스에 저장하고,
//! 그 세션의 패시지만으로 질문에 답합니다. 유휴 세션은 백그라운드 스위퍼가 정리합니다.
//!
//! ```rust,ignore
//! let service = DocumentChatService::offline(RagConfig::default())?;
//! service.ingest("s1", "report.pdf", &bytes, true).await?;
//! let result = service.query("s1", "What was the revenue?").await?;
//! ```

pub mod answer;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod pipeline;
pub mod service;
pub mod sweeper;

// Re-exports
pub use answer::{AnswerModel, EchoAnswerModel, GeminiAnswerModel};
pub use config::{get_data_dir, IndexBackend, RagConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding, HashingEmbedding};
pub use error::{ErrorBody, RagError, Result};
pub use extractor::{extractor_for, DocumentExtractor, PdfExtractor, TextExtractor};
pub use knowledge::{
    ChunkConfig, Chunker, OverlapChunker, PageText, Passage, Session, SessionIndex, SessionStore,
    VectorStore, VectorStoreFactory,
};
pub use pipeline::{RetrievalPipeline, RetrievalResult, Source};
pub use service::{DocumentChatService, IngestReport};
pub use sweeper::{SweepReport, Sweeper};
