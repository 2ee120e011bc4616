//! DocumentChatService - HTTP 계층이 사용하는 상위 인터페이스
//!
//! 추출 -> 청킹 -> 세션 저장소(생성/교체/추가) 흐름과 질의, 문서 목록,
//! 세션 정리를 하나의 핸들로 묶습니다. 전역 상태는 없고 모든 연산은 세션 ID를 받습니다.

use std::sync::Arc;

use serde::Serialize;

use crate::answer::{AnswerModel, EchoAnswerModel, GeminiAnswerModel};
use crate::config::{IndexBackend, RagConfig};
use crate::embedding::{EmbeddingProvider, GeminiEmbedding, HashingEmbedding};
use crate::error::{RagError, Result};
use crate::extractor::extractor_for;
use crate::knowledge::{
    overlap_chunker, Chunker, LanceStoreFactory, MemoryStoreFactory, PageText, SessionStore,
    VectorStoreFactory,
};
use crate::pipeline::{RetrievalPipeline, RetrievalResult};
use crate::sweeper::Sweeper;

/// 수집 결과
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub session_id: String,
    pub document: String,
    /// 이번 문서에서 생성된 패시지 수
    pub passages: usize,
    /// 추출된 페이지 수
    pub pages: usize,
    /// 수집 후 세션 문서 목록 (수집 순서)
    pub documents: Vec<String>,
}

/// 문서 Q&A 서비스
pub struct DocumentChatService {
    config: RagConfig,
    store: Arc<SessionStore>,
    pipeline: RetrievalPipeline,
    chunker: Box<dyn Chunker>,
}

impl DocumentChatService {
    /// 협력자를 직접 지정하여 생성
    pub fn with_factory(
        config: RagConfig,
        factory: Arc<dyn VectorStoreFactory>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn AnswerModel>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SessionStore::new(factory, embedder));
        let pipeline = RetrievalPipeline::new(store.clone(), model, config.top_k);
        let chunker = overlap_chunker(config.chunk.clone());

        Ok(Self {
            config,
            store,
            pipeline,
            chunker,
        })
    }

    /// 설정의 백엔드로 저장소 팩토리를 선택하여 생성
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn AnswerModel>,
    ) -> Result<Self> {
        let factory: Arc<dyn VectorStoreFactory> = match config.backend {
            IndexBackend::Memory => Arc::new(MemoryStoreFactory),
            IndexBackend::Lance => Arc::new(LanceStoreFactory::new(
                config.sessions_dir(),
                embedder.dimension(),
            )),
        };

        tracing::info!(
            "Document chat service: backend {:?}, embedder {}, model {}",
            config.backend,
            embedder.name(),
            model.name()
        );

        Self::with_factory(config, factory, embedder, model)
    }

    /// Gemini 임베딩 + Gemini 답변 모델 (API 키 필요)
    pub fn from_env(config: RagConfig) -> Result<Self> {
        let embedder = Arc::new(GeminiEmbedding::from_env_with_dimension(
            config.embedding_dimension,
        )?);
        let model = Arc::new(GeminiAnswerModel::from_env()?);
        Self::new(config, embedder, model)
    }

    /// 네트워크 없이 동작 (해시 임베딩 + 에코 모델)
    pub fn offline(config: RagConfig) -> Result<Self> {
        let embedder = Arc::new(HashingEmbedding::new(config.embedding_dimension));
        Self::new(config, embedder, Arc::new(EchoAnswerModel))
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// 설정 기반 스위퍼 생성 (Lance 백엔드면 고아 디렉토리 정리 포함)
    pub fn sweeper(&self) -> Sweeper {
        let sweeper = Sweeper::new(
            self.store.clone(),
            self.config.retention,
            self.config.sweep_interval,
        );

        match self.config.backend {
            IndexBackend::Lance => sweeper.with_storage_root(self.config.sessions_dir()),
            IndexBackend::Memory => sweeper,
        }
    }

    /// 문서 바이트 수집
    ///
    /// `replace`가 true면 세션 인덱스를 새로 만들고 문서 목록을 초기화합니다.
    /// false면 기존 인덱스에 추가하며, 인덱스가 없으면 `NoActiveSession`.
    pub async fn ingest(
        &self,
        session_id: &str,
        document: &str,
        bytes: &[u8],
        replace: bool,
    ) -> Result<IngestReport> {
        let extractor = extractor_for(document)?;
        let pages = extractor.extract(bytes).await?;

        tracing::debug!(
            "Extracted {} pages from {} with {}",
            pages.len(),
            document,
            extractor.name()
        );

        self.ingest_pages(session_id, document, &pages, replace).await
    }

    /// 이미 추출된 페이지 수집
    pub async fn ingest_pages(
        &self,
        session_id: &str,
        document: &str,
        pages: &[PageText],
        replace: bool,
    ) -> Result<IngestReport> {
        if session_id.trim().is_empty() {
            return Err(RagError::InvalidConfig("session id must not be empty".into()));
        }

        let passages = self.chunker.chunk_pages(session_id, document, pages)?;

        let update = if replace {
            self.store
                .create_or_replace(session_id, document, passages)
                .await?
        } else {
            self.store
                .append_document(session_id, document, passages)
                .await?
        };

        tracing::info!(
            "Ingested {} into session {} ({} pages, {} passages, replace={})",
            document,
            session_id,
            pages.len(),
            update.passages_added,
            replace
        );

        Ok(IngestReport {
            session_id: session_id.to_string(),
            document: document.to_string(),
            passages: update.passages_added,
            pages: pages.len(),
            documents: update.documents,
        })
    }

    /// 질문에 답변
    pub async fn query(&self, session_id: &str, question: &str) -> Result<RetrievalResult> {
        self.pipeline.answer(session_id, question).await
    }

    /// 세션 문서 목록 (세션이 없으면 빈 목록)
    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<String>> {
        match self.store.get(session_id).await {
            Ok(session) => Ok(session.documents),
            Err(RagError::SessionNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// 세션 정리
    ///
    /// # Returns
    /// 세션이 존재해서 삭제되었으면 `true`
    pub async fn clear_session(&self, session_id: &str) -> Result<bool> {
        self.store.clear(session_id).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{session_dir_name, ChunkConfig};
    use tempfile::TempDir;

    fn service() -> DocumentChatService {
        DocumentChatService::offline(RagConfig {
            embedding_dimension: 256,
            ..RagConfig::default()
        })
        .unwrap()
    }

    fn page(text: &str) -> Vec<PageText> {
        vec![PageText::new(text, 1)]
    }

    #[tokio::test]
    async fn test_end_to_end_single_page() {
        let service = service();
        let report = service
            .ingest_pages("s1", "report.pdf", &page("Q1 2024 revenue was $5M."), true)
            .await
            .unwrap();
        assert_eq!(report.documents, vec!["report.pdf"]);
        assert_eq!(report.passages, 1);

        let result = service.query("s1", "What was the revenue?").await.unwrap();
        assert_eq!(result.filename, "report.pdf");
        assert_eq!(result.page_number, Some(1));
        assert_eq!(result.total_pages, 1);
        assert!(result.answer.contains("5M"));
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[tokio::test]
    async fn test_ingest_text_bytes() {
        let service = service();
        let report = service
            .ingest("s1", "notes.txt", b"first page\x0csecond page", true)
            .await
            .unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.passages, 2);

        let err = service
            .ingest("s1", "empty.txt", b"   ", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DocumentEmpty(_)));

        let err = service
            .ingest("s1", "photo.png", b"\x89PNG", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnreadableDocument(_)));
    }

    #[tokio::test]
    async fn test_replace_semantics() {
        let service = service();
        service
            .ingest_pages("s1", "d1.pdf", &page("zebra stripes savanna"), true)
            .await
            .unwrap();
        service
            .ingest_pages("s1", "d2.pdf", &page("glacier penguin iceberg"), true)
            .await
            .unwrap();

        assert_eq!(service.list_documents("s1").await.unwrap(), vec!["d2.pdf"]);

        let result = service.query("s1", "zebra stripes savanna").await.unwrap();
        assert_eq!(result.filename, "d2.pdf");
        assert!(!result.answer.contains("zebra"));
    }

    #[tokio::test]
    async fn test_append_semantics() {
        let service = service();

        let err = service
            .ingest_pages("s1", "d2.pdf", &page("glacier"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NoActiveSession(_)));

        service
            .ingest_pages("s1", "d1.pdf", &page("zebra stripes savanna"), true)
            .await
            .unwrap();
        let report = service
            .ingest_pages("s1", "d2.pdf", &page("glacier penguin iceberg"), false)
            .await
            .unwrap();
        assert_eq!(report.documents, vec!["d1.pdf", "d2.pdf"]);
        assert_eq!(service.list_documents("s1").await.unwrap(), vec!["d1.pdf", "d2.pdf"]);

        let result = service.query("s1", "zebra stripes savanna").await.unwrap();
        assert!(result.answer.contains("zebra"));
        assert!(result.answer.contains("glacier"));
    }

    #[tokio::test]
    async fn test_clear_then_query_fails() {
        let service = service();
        service
            .ingest_pages("s1", "a.pdf", &page("alpha beta"), true)
            .await
            .unwrap();

        assert!(service.clear_session("s1").await.unwrap());
        let err = service.query("s1", "alpha").await.unwrap_err();
        assert!(matches!(err, RagError::NoActiveSession(_)));
        assert!(service.list_documents("s1").await.unwrap().is_empty());
        assert_eq!(err.user_message(), "Please upload a document first");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_are_isolated() {
        let service = Arc::new(service());
        let shared_text = "the quarterly budget report lists revenue and costs";

        let mut handles = Vec::new();
        for round in 0..8 {
            for session in ["a", "b"] {
                let service = service.clone();
                handles.push(tokio::spawn(async move {
                    let document = format!("{}.pdf", session);
                    service
                        .ingest_pages(session, &document, &page(shared_text), round % 2 == 0)
                        .await
                        .ok();

                    match service.query(session, "quarterly budget revenue").await {
                        Ok(result) => assert_eq!(result.filename, document),
                        Err(RagError::NoActiveSession(_)) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }));
            }
        }

        for handle in handles {
            handle.await.unwrap();
        }

        for session in ["a", "b"] {
            let documents = service.list_documents(session).await.unwrap();
            let expected = format!("{}.pdf", session);
            assert!(documents.iter().all(|d| *d == expected));
        }
    }

    #[tokio::test]
    async fn test_chunk_policy_from_config() {
        let service = DocumentChatService::offline(RagConfig {
            chunk: ChunkConfig {
                chunk_size: 20,
                chunk_overlap: 5,
            },
            embedding_dimension: 64,
            ..RagConfig::default()
        })
        .unwrap();

        let text = "word ".repeat(40);
        let report = service
            .ingest_pages("s1", "long.txt", &page(&text), true)
            .await
            .unwrap();
        assert!(report.passages >= 2);
    }

    #[tokio::test]
    async fn test_lance_backend_lifecycle() {
        let temp = TempDir::new().unwrap();
        let config = RagConfig {
            backend: IndexBackend::Lance,
            data_dir: temp.path().to_path_buf(),
            embedding_dimension: 32,
            ..RagConfig::default()
        };
        let sessions_dir = config.sessions_dir();
        let service = DocumentChatService::offline(config).unwrap();

        service
            .ingest_pages("s1", "report.pdf", &page("Q1 2024 revenue was $5M."), true)
            .await
            .unwrap();
        let session_dir = sessions_dir.join(session_dir_name("s1"));
        assert!(session_dir.exists());

        let result = service.query("s1", "What was the revenue?").await.unwrap();
        assert_eq!(result.filename, "report.pdf");
        assert!(result.answer.contains("5M"));

        assert!(service.clear_session("s1").await.unwrap());
        assert!(!session_dir.exists());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RagConfig {
            top_k: 0,
            ..RagConfig::default()
        };
        assert!(matches!(
            DocumentChatService::offline(config),
            Err(RagError::InvalidConfig(_))
        ));
    }
}
