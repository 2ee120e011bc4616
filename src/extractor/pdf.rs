//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 메모리 상의 PDF에서 페이지별 텍스트를 추출합니다.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{RagError, Result};
use crate::knowledge::PageText;

use super::DocumentExtractor;

const UNREADABLE_PDF: &str =
    "Could not extract text from PDF. The file might be corrupted or password-protected.";

/// PDF 추출기
#[derive(Debug, Default, Clone)]
pub struct PdfExtractor;

#[async_trait]
impl DocumentExtractor for PdfExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용 (패닉도 여기서 격리)
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || extract_pages_from_mem(&bytes))
            .await
            .map_err(|e| {
                tracing::warn!("PDF extraction task failed: {}", e);
                RagError::UnreadableDocument(UNREADABLE_PDF.to_string())
            })?
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

/// PDF 바이트에서 페이지별 텍스트 추출
///
/// 페이지 번호는 1부터 시작합니다. 텍스트가 없으면 빈 벡터를 반환합니다.
pub fn extract_pages_from_mem(bytes: &[u8]) -> Result<Vec<PageText>> {
    if !bytes.starts_with(b"%PDF") {
        return Err(RagError::UnreadableDocument(UNREADABLE_PDF.to_string()));
    }

    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        tracing::warn!("pdf-extract failed: {}", e);
        RagError::UnreadableDocument(UNREADABLE_PDF.to_string())
    })?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(Vec::new());
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText::new(text, i as u32 + 1))
        .collect())
}

fn page_marker() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^\s*[-=]+\s*(?:Page\s*)?(\d+)\s*[-=]+\s*$").ok())
        .as_ref()
}

/// PDF 텍스트를 페이지별로 분리
///
/// 폼피드(`\x0c`)가 우선이고, 없으면 "--- Page N ---" 형태의 구분선을 사용합니다.
/// 빈 페이지는 번호를 유지하기 위해 남겨둡니다.
fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();
    let pages = trim_trailing_blank(pages);

    if pages.len() > 1 {
        return pages;
    }

    if let Some(pattern) = page_marker() {
        if pattern.is_match(text) {
            let pages: Vec<String> = pattern
                .split(text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            if pages.len() > 1 {
                return pages;
            }
        }
    }

    vec![text.trim().to_string()]
}

/// 마지막 폼피드 뒤의 빈 조각 제거
fn trim_trailing_blank(mut pages: Vec<String>) -> Vec<String> {
    while pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    pages
}

// ============================================================================
// Tests
// ============================================================================
