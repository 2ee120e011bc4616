//! 콘텐츠 추출 모듈
//!
//! 업로드된 문서 바이트에서 페이지별 텍스트를 추출합니다.
//! - 텍스트 파일: UTF-8로 직접 읽기 (폼피드로 페이지 구분)
//! - PDF 파일: pdf-extract로 텍스트 추출

pub mod pdf;

use std::path::Path;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::knowledge::PageText;

pub use pdf::PdfExtractor;

// ============================================================================
// DocumentExtractor Trait
// ============================================================================

/// 문서 추출기 트레이트
///
/// 손상되었거나 암호화된 입력은 `UnreadableDocument`로 실패합니다.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// 페이지별 텍스트 추출 (페이지 번호 1부터)
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>>;

    /// 추출기 이름
    fn name(&self) -> &'static str;
}

/// 파일 이름 확장자로 추출기 선택
pub fn extractor_for(name: &str) -> Result<Box<dyn DocumentExtractor>> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => Ok(Box::new(PdfExtractor)),
        "txt" | "text" | "md" | "markdown" => Ok(Box::new(TextExtractor)),
        _ => Err(RagError::UnreadableDocument(format!(
            "Unsupported document type: {}",
            name
        ))),
    }
}

// ============================================================================
// Text Extractor
// ============================================================================

/// 일반 텍스트 추출기
#[derive(Debug, Default, Clone)]
pub struct TextExtractor;

#[async_trait]
impl DocumentExtractor for TextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            RagError::UnreadableDocument(format!("Document is not valid UTF-8 text: {}", e))
        })?;

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(text
            .split('\x0c')
            .enumerate()
            .map(|(i, page)| PageText::new(page, i as u32 + 1))
            .collect())
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_for() {
        assert_eq!(extractor_for("report.PDF").unwrap().name(), "pdf");
        assert_eq!(extractor_for("notes.txt").unwrap().name(), "text");
        assert_eq!(extractor_for("README.md").unwrap().name(), "text");
        assert!(matches!(
            extractor_for("image.png"),
            Err(RagError::UnreadableDocument(_))
        ));
        assert!(extractor_for("no_extension").is_err());
    }

    #[tokio::test]
    async fn test_text_extractor_pages() {
        let pages = TextExtractor
            .extract("first page\x0csecond page".as_bytes())
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].text, "second page");
        assert_eq!(pages[1].page_number, 2);
    }

    #[tokio::test]
    async fn test_text_extractor_rejects_binary() {
        let err = TextExtractor.extract(&[0xff, 0xfe, 0x00]).await.unwrap_err();
        assert!(matches!(err, RagError::UnreadableDocument(_)));

        assert!(TextExtractor.extract(b"   \n").await.unwrap().is_empty());
    }
}
