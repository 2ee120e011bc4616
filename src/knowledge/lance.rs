//! LanceDB Vector Store - 세션별 디스크 벡터 저장소
//!
//! 세션 하나당 `.lance` 디렉토리 하나를 사용합니다. 세션을 교체하거나
//! 정리할 때는 디렉토리를 통째로 삭제합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

use super::passage::Passage;
use super::vector::{SearchResult, VectorEntry, VectorStore, VectorStoreFactory};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "passages";

/// 세션 디렉토리 확장자
pub const SESSION_DIR_SUFFIX: &str = ".lance";

fn storage_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> RagError {
    move |e| RagError::Storage(format!("{}: {}", what, e))
}

/// 세션 ID -> 디렉토리 이름 (sha256 hex)
///
/// 세션 ID는 외부 입력이므로 경로에 그대로 쓰지 않습니다.
pub fn session_dir_name(session_id: &str) -> String {
    format!("{:x}{}", Sha256::digest(session_id.as_bytes()), SESSION_DIR_SUFFIX)
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    path: PathBuf,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(storage_err("Failed to create LanceDB directory"))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Storage(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(storage_err("Failed to connect to LanceDB"))?;

        let dimension = i32::try_from(dimension)
            .map_err(|_| RagError::InvalidConfig(format!("dimension too large: {}", dimension)))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            dimension,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 패시지 테이블 스키마
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("session_id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new("page_number", DataType::UInt32, false),
            Field::new("snippet", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            return Err(RagError::Storage(
                "Cannot create batch from empty entries".into(),
            ));
        }

        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimension as usize)
        {
            return Err(RagError::Storage(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.embedding.len()
            )));
        }

        let session_ids: Vec<&str> = entries.iter().map(|e| e.passage.session_id.as_str()).collect();
        let documents: Vec<&str> = entries.iter().map(|e| e.passage.document.as_str()).collect();
        let pages: Vec<u32> = entries.iter().map(|e| e.passage.page_number).collect();
        let snippets: Vec<&str> = entries.iter().map(|e| e.passage.snippet.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.passage.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(storage_err("Failed to create embedding array"))?;

        RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(session_ids)),
                Arc::new(StringArray::from(documents)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(StringArray::from(snippets)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(storage_err("Failed to create RecordBatch"))
    }

    /// 테이블 존재 여부 확인
    ///
    /// 삭제된 세션 디렉토리는 빈 저장소로 취급합니다. 목록 조회 실패는 `Storage`.
    async fn table_exists(&self) -> Result<bool> {
        let on_disk = tokio::fs::try_exists(&self.path)
            .await
            .map_err(storage_err("Failed to stat session storage"))?;
        if !on_disk {
            return Ok(false);
        }

        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(storage_err("Failed to list tables"))?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(storage_err("Failed to open table"))
    }
}

/// 검색 결과 배치에서 패시지 추출
fn batch_to_results(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .ok_or_else(|| RagError::Storage(format!("Missing {} column", name)))
    }

    let session_ids = column::<StringArray>(batch, "session_id")?;
    let documents = column::<StringArray>(batch, "document")?;
    let pages = column::<UInt32Array>(batch, "page_number")?;
    let snippets = column::<StringArray>(batch, "snippet")?;
    let texts = column::<StringArray>(batch, "text")?;

    // _distance 컬럼 (LanceDB가 자동 추가, 없을 수 있음)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|i| SearchResult {
            passage: Passage {
                text: texts.value(i).to_string(),
                document: documents.value(i).to_string(),
                page_number: pages.value(i),
                snippet: snippets.value(i).to_string(),
                session_id: session_ids.value(i).to_string(),
            },
            distance: distances.map(|d| d.value(i)),
        })
        .collect())
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await? {
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .map_err(storage_err("Failed to add vectors to table"))?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .map_err(storage_err("Failed to create table"))?;
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        if !self.table_exists().await? {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;

        let stream = table
            .vector_search(query_embedding.to_vec())
            .map_err(storage_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(storage_err("Failed to execute vector search"))?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(storage_err("Failed to read search results"))?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(batch_to_results(batch)?);
        }

        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        self.open_table()
            .await?
            .count_rows(None)
            .await
            .map_err(storage_err("Failed to count rows"))
    }

    async fn destroy(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                tracing::debug!("Removed session storage {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagError::Storage(format!(
                "Failed to remove {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "lancedb"
    }
}

// ============================================================================
// LanceStoreFactory
// ============================================================================

/// `<root>/<sha256(session)>.lance` 위치에 세션 저장소를 생성
#[derive(Debug, Clone)]
pub struct LanceStoreFactory {
    root: PathBuf,
    dimension: usize,
}

impl LanceStoreFactory {
    pub fn new(root: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            root: root.into(),
            dimension,
        }
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(session_dir_name(session_id))
    }
}

#[async_trait]
impl VectorStoreFactory for LanceStoreFactory {
    async fn create(&self, session_id: &str) -> Result<Arc<dyn VectorStore>> {
        let path = self.session_path(session_id);

        // 이전 프로세스가 남긴 잔여 데이터 제거
        if path.exists() {
            tracing::debug!("Removing residual session storage {:?}", path);
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(storage_err("Failed to remove residual session storage"))?;
        }

        let store = LanceVectorStore::open(&path, self.dimension).await?;
        Ok(Arc::new(store))
    }
}

// ============================================================================
// Tests
// ============================================================================
