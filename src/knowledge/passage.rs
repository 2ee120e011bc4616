//! Passage - 출처 메타데이터가 붙은 문서 청크

use serde::{Deserialize, Serialize};

/// 스니펫 최대 문자 수
pub const SNIPPET_CHARS: usize = 200;

/// 추출된 한 페이지의 텍스트
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    /// 페이지 번호 (1부터 시작, 0 = 미상)
    pub page_number: u32,
}

impl PageText {
    pub fn new(text: impl Into<String>, page_number: u32) -> Self {
        Self {
            text: text.into(),
            page_number,
        }
    }
}

/// 인덱스에 저장되는 패시지
///
/// `session_id`는 패시지를 생성한 세션과 항상 같아야 하며,
/// 패시지는 세션 간에 공유되거나 병합되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// 청크 텍스트
    pub text: String,
    /// 소속 문서 이름
    pub document: String,
    /// 시작 페이지 번호 (1부터)
    pub page_number: u32,
    /// 원본 페이지 앞부분 미리보기
    pub snippet: String,
    /// 소유 세션 ID
    pub session_id: String,
}

/// 페이지 미리보기 생성 (UTF-8 안전, 줄바꿈 제거)
pub fn make_snippet(page_text: &str) -> String {
    let cleaned = page_text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= SNIPPET_CHARS {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_snippet_short() {
        assert_eq!(make_snippet("hello\nworld"), "hello world");
    }

    #[test]
    fn test_make_snippet_truncates() {
        let text = "가".repeat(250);
        let snippet = make_snippet(&text);
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }
}
