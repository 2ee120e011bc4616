//! 설정 모듈
//!
//! 청킹 정책, 검색 폭(top-k), 보존 기간, 스윕 주기, 인덱스 백엔드를 관리합니다.
//! 환경변수(`SESSION_RAG_*`)로 기본값을 덮어쓸 수 있습니다.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::knowledge::ChunkConfig;

/// 기본 검색 폭
pub const DEFAULT_TOP_K: usize = 4;

/// 기본 보존 기간 (24시간)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// 기본 스윕 주기 (2시간)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// 기본 임베딩 차원
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.session-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".session-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 세션 인덱스 저장 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// 프로세스 메모리 (재시작 시 소멸)
    Memory,
    /// LanceDB 디렉토리 (세션별 디렉토리)
    Lance,
}

impl IndexBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(IndexBackend::Memory),
            "lance" | "lancedb" => Ok(IndexBackend::Lance),
            other => Err(RagError::InvalidConfig(format!(
                "unknown index backend '{}', expected 'memory' or 'lance'",
                other
            ))),
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// 청킹 정책
    pub chunk: ChunkConfig,
    /// 질의 시 가져올 패시지 수
    pub top_k: usize,
    /// 유휴 세션 보존 기간
    pub retention: Duration,
    /// 스위퍼 실행 주기
    pub sweep_interval: Duration,
    /// 인덱스 백엔드
    pub backend: IndexBackend,
    /// 데이터 디렉토리 (Lance 백엔드 전용)
    pub data_dir: PathBuf,
    /// 임베딩 차원
    pub embedding_dimension: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            top_k: DEFAULT_TOP_K,
            retention: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            backend: IndexBackend::Memory,
            data_dir: get_data_dir(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl RagConfig {
    /// 환경변수에서 설정 로드 (없으면 기본값)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성
    ///
    /// 테스트에서 프로세스 환경변수를 건드리지 않도록 분리했습니다.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("SESSION_RAG_CHUNK_SIZE") {
            config.chunk.chunk_size = parse_number("SESSION_RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("SESSION_RAG_CHUNK_OVERLAP") {
            config.chunk.chunk_overlap = parse_number("SESSION_RAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("SESSION_RAG_TOP_K") {
            config.top_k = parse_number("SESSION_RAG_TOP_K", &v)?;
        }
        if let Some(v) = lookup("SESSION_RAG_RETENTION_SECS") {
            config.retention =
                Duration::from_secs(parse_number("SESSION_RAG_RETENTION_SECS", &v)? as u64);
        }
        if let Some(v) = lookup("SESSION_RAG_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse_number("SESSION_RAG_SWEEP_INTERVAL_SECS", &v)? as u64);
        }
        if let Some(v) = lookup("SESSION_RAG_BACKEND") {
            config.backend = IndexBackend::parse(&v)?;
        }
        if let Some(v) = lookup("SESSION_RAG_DATA_DIR") {
            if !v.trim().is_empty() {
                config.data_dir = PathBuf::from(v);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk size must be > 0".into()));
        }
        if self.chunk.chunk_overlap >= self.chunk.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk.chunk_overlap, self.chunk.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be >= 1".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(RagError::InvalidConfig("sweep interval must be > 0".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::InvalidConfig(
                "embedding dimension must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Lance 세션 디렉토리 루트
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| RagError::InvalidConfig(format!("{} must be a number, got '{}'", key, value)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.chunk.chunk_size, 1000);
        assert_eq!(config.chunk.chunk_overlap, 200);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval, Duration::from_secs(7_200));
        assert_eq!(config.backend, IndexBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = RagConfig::from_lookup(lookup_from(&[
            ("SESSION_RAG_TOP_K", "3"),
            ("SESSION_RAG_RETENTION_SECS", "60"),
            ("SESSION_RAG_BACKEND", "lance"),
            ("SESSION_RAG_DATA_DIR", "/tmp/rag"),
        ]))
        .unwrap();

        assert_eq!(config.top_k, 3);
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.backend, IndexBackend::Lance);
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/rag/sessions"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RagConfig::from_lookup(lookup_from(&[("SESSION_RAG_TOP_K", "abc")]))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");

        let err = RagConfig::from_lookup(lookup_from(&[
            ("SESSION_RAG_CHUNK_SIZE", "100"),
            ("SESSION_RAG_CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("overlap"));

        assert!(IndexBackend::parse("redis").is_err());
    }
}
