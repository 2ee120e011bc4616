//! Text Chunking Module
//!
//! 페이지 텍스트를 고정 크기 + 오버랩 청크로 분할하고,
//! 각 청크에 출처 메타데이터(문서, 페이지, 스니펫, 세션)를 붙입니다.

use crate::error::{RagError, Result};

use super::passage::{make_snippet, PageText, Passage};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 목표 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// 작은 청크 (정밀도 우선)
    pub fn for_precision() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 문서의 페이지들을 패시지로 변환
    ///
    /// 페이지가 하나도 없거나 모든 페이지가 비어 있으면 `DocumentEmpty`.
    /// 스니펫은 페이지당 한 번 계산되어 그 페이지의 모든 청크에 복사됩니다.
    fn chunk_pages(
        &self,
        session_id: &str,
        document: &str,
        pages: &[PageText],
    ) -> Result<Vec<Passage>> {
        if pages.is_empty() {
            return Err(RagError::DocumentEmpty(document.to_string()));
        }

        let mut passages = Vec::new();

        for page in pages {
            let chunks = self.chunk(&page.text);
            if chunks.is_empty() {
                continue;
            }

            let page_number = page.page_number.max(1);
            let snippet = make_snippet(&page.text);

            passages.extend(chunks.into_iter().map(|text| Passage {
                text,
                document: document.to_string(),
                page_number,
                snippet: snippet.clone(),
                session_id: session_id.to_string(),
            }));
        }

        if passages.is_empty() {
            return Err(RagError::DocumentEmpty(document.to_string()));
        }

        tracing::debug!(
            "Chunked {} ({} pages) into {} passages with {}",
            document,
            pages.len(),
            passages.len(),
            self.name()
        );

        Ok(passages)
    }
}

// ============================================================================
// OverlapChunker
// ============================================================================

/// 슬라이딩 윈도우 청커
///
/// 각 청크는 최대 `chunk_size` 문자이며, 다음 청크는 이전 청크의 마지막
/// `chunk_overlap` 문자로 시작합니다. 가능하면 공백 뒤에서 청크를 끊습니다.
/// 따라서 첫 청크 + (나머지 청크에서 앞 `chunk_overlap` 문자 제거)를 이으면
/// 원문이 그대로 복원됩니다.
pub struct OverlapChunker {
    config: ChunkConfig,
}

impl OverlapChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 실제 적용되는 (크기, 오버랩)
    fn effective_sizes(&self) -> (usize, usize) {
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(size - 1);
        (size, overlap)
    }
}

impl Chunker for OverlapChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let (size, overlap) = self.effective_sizes();
        let chars: Vec<char> = text.chars().collect();

        if chars.len() <= size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + size).min(chars.len());
            if hard_end == chars.len() {
                chunks.push(chars[start..].iter().collect());
                break;
            }

            // 다음 시작점이 반드시 앞으로 전진하도록 하한을 둠
            let end = snap_to_whitespace(&chars, start + overlap + 1, hard_end);
            chunks.push(chars[start..end].iter().collect());
            start = end - overlap;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "OverlapChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `[min_end, hard_end]` 범위에서 공백 바로 뒤 위치를 뒤에서부터 찾음
///
/// 없으면 `hard_end` 그대로 반환합니다.
fn snap_to_whitespace(chars: &[char], min_end: usize, hard_end: usize) -> usize {
    (min_end..=hard_end)
        .rev()
        .find(|&end| end > 0 && chars[end - 1].is_whitespace())
        .unwrap_or(hard_end)
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(OverlapChunker::with_defaults())
}

/// 설정을 지정한 청커 생성
pub fn overlap_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(OverlapChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(chunk);
            } else {
                out.extend(chunk.chars().skip(overlap));
            }
        }
        out
    }

    fn long_text() -> String {
        (0..120)
            .map(|i| format!("Sentence number {} talks about quarterly results.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_chunker_empty() {
        let chunker = OverlapChunker::with_defaults();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t").is_empty());
    }

    #[test]
    fn test_chunker_small_text() {
        let chunker = OverlapChunker::with_defaults();
        let chunks = chunker.chunk("Q1 2024 revenue was $5M.");
        assert_eq!(chunks, vec!["Q1 2024 revenue was $5M.".to_string()]);
    }

    #[test]
    fn test_overlap_reconstructs_original() {
        let chunker = OverlapChunker::with_defaults();
        let text = long_text();
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
        assert_eq!(reconstruct(&chunks, 200), text);
    }

    #[test]
    fn test_overlap_is_exact() {
        let chunker = OverlapChunker::new(ChunkConfig {
            chunk_size: 50,
            chunk_overlap: 10,
        });
        let text = long_text();
        let chunks = chunker.chunk(&text);

        for pair in chunks.windows(2) {
            let tail: String = {
                let chars: Vec<char> = pair[0].chars().collect();
                chars[chars.len() - 10..].iter().collect()
            };
            let head: String = pair[1].chars().take(10).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_no_whitespace_and_multibyte() {
        let chunker = OverlapChunker::new(ChunkConfig {
            chunk_size: 7,
            chunk_overlap: 2,
        });
        let text = "가나다라마바사아자차카타파하가나다라마바사";
        let chunks = chunker.chunk(text);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        assert_eq!(reconstruct(&chunks, 2), text);
    }

    #[test]
    fn test_zero_overlap() {
        let chunker = OverlapChunker::new(ChunkConfig::for_fast());
        let text = long_text();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_pages_metadata() {
        let chunker = OverlapChunker::new(ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 20,
        });
        let pages = vec![
            PageText::new(long_text(), 1),
            PageText::new("Second page text.", 2),
            PageText::new("Unknown page.", 0),
        ];

        let passages = chunker.chunk_pages("s1", "report.pdf", &pages).unwrap();

        let first_page: Vec<&Passage> = passages.iter().filter(|p| p.page_number == 1).collect();
        assert!(first_page.len() >= 2);
        assert!(first_page.iter().all(|p| p.snippet == first_page[0].snippet));
        assert!(first_page[0].snippet.ends_with("..."));

        assert!(passages.iter().all(|p| p.session_id == "s1"));
        assert!(passages.iter().all(|p| p.document == "report.pdf"));
        // 페이지 번호 미상 -> 1
        assert!(passages
            .iter()
            .any(|p| p.text == "Unknown page." && p.page_number == 1));
    }

    #[test]
    fn test_chunk_pages_empty_document() {
        let chunker = OverlapChunker::with_defaults();

        let err = chunker.chunk_pages("s1", "empty.pdf", &[]).unwrap_err();
        assert_eq!(err, RagError::DocumentEmpty("empty.pdf".into()));

        let blank = vec![PageText::new("  ", 1)];
        assert!(matches!(
            chunker.chunk_pages("s1", "blank.pdf", &blank),
            Err(RagError::DocumentEmpty(_))
        ));
    }

    #[test]
    fn test_config_presets() {
        let default = ChunkConfig::default();
        assert_eq!(default.chunk_size, 1000);
        assert_eq!(default.chunk_overlap, 200);

        assert_eq!(ChunkConfig::for_precision().chunk_size, 500);
        assert_eq!(ChunkConfig::for_fast().chunk_overlap, 0);
    }
}
