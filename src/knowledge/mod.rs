//! Knowledge 모듈 - 세션 범위 RAG 지식 저장소
//!
//! - Chunker: 페이지 텍스트를 겹치는 패시지로 분할
//! - Vector: 유사도 엔진 추상화 (Memory / LanceDB)
//! - Index: 세션이 독점 소유하는 인덱스 파사드
//! - Store: 세션 ID -> 인덱스/문서 목록/활동 시각

mod chunker;
mod index;
mod lance;
mod memory;
mod passage;
mod store;
mod vector;

// Re-exports
pub use chunker::{default_chunker, overlap_chunker, ChunkConfig, Chunker, OverlapChunker};
pub use index::{ScoredPassage, SessionIndex};
pub use lance::{session_dir_name, LanceStoreFactory, LanceVectorStore, SESSION_DIR_SUFFIX};
pub use memory::{MemoryStoreFactory, MemoryVectorStore};
pub use passage::{make_snippet, PageText, Passage, SNIPPET_CHARS};
pub use store::{IndexUpdate, Session, SessionReadGuard, SessionStore};
pub use vector::{
    cosine_distance, cosine_similarity, SearchResult, VectorEntry, VectorStore, VectorStoreFactory,
};
