//! 답변 생성 모듈
//!
//! 검색된 패시지만을 근거로 질문에 답합니다.
//! - `GeminiAnswerModel`: Gemini generateContent 호출
//! - `EchoAnswerModel`: 네트워크 없이 근거 패시지를 그대로 돌려주는 오프라인 모델

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{get_api_key, GeminiError};
use crate::error::{RagError, Result};
use crate::knowledge::Passage;

/// 문맥에 답이 없을 때의 응답
pub const NOT_FOUND_ANSWER: &str = "The answer was not found in the document.";

// ============================================================================
// AnswerModel Trait
// ============================================================================

/// 답변 생성 모델 트레이트
#[async_trait]
pub trait AnswerModel: Send + Sync {
    /// 질문과 근거 패시지로 답변 생성
    async fn complete(&self, question: &str, passages: &[Passage]) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

/// 근거 패시지로 프롬프트 구성
pub fn build_prompt(question: &str, passages: &[Passage]) -> String {
    let context = passages
        .iter()
        .map(|p| format!("[{} p.{}]\n{}", p.document, p.page_number, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question using only the context below.\n\
         If the answer is not in the context, reply exactly: \"{}\"\n\n\
         Context:\n{}\n\n\
         Question: {}\n\
         Answer:",
        NOT_FOUND_ANSWER, context, question
    )
}

// ============================================================================
// Gemini
// ============================================================================

const GEMINI_GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

/// Gemini 답변 모델
#[derive(Debug)]
pub struct GeminiAnswerModel {
    api_key: String,
    client: reqwest::Client,
    temperature: f32,
}

impl GeminiAnswerModel {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RagError::ModelUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            temperature: 0.2,
        })
    }

    /// 환경변수 API 키로 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }
}

#[async_trait]
impl AnswerModel for GeminiAnswerModel {
    async fn complete(&self, question: &str, passages: &[Passage]) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: build_prompt(question, passages),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: 1024,
            },
        };

        let response = self
            .client
            .post(GEMINI_GENERATE_URL)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::ModelUnavailable(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::ModelUnavailable(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<GeminiError>(&body)
                .map(|e| format!("{} ({})", e.error.message, e.error.status))
                .unwrap_or(body);

            return Err(if status.as_u16() == 429 {
                RagError::RateLimited(format!("Gemini generation: {}", detail))
            } else {
                RagError::ModelUnavailable(format!("Gemini API error ({}): {}", status, detail))
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::ModelUnavailable(format!("Failed to parse generation response: {}", e))
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            tracing::warn!("Gemini returned an empty answer");
            return Err(RagError::ModelUnavailable("Empty response from model".to_string()));
        }

        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        "gemini-1.5-flash"
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContent {
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize)]
struct GeneratePart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

// ============================================================================
// Echo (offline)
// ============================================================================

/// 오프라인 답변 모델
///
/// 근거 패시지 텍스트를 이어 붙여 반환합니다. 근거가 없으면 `NOT_FOUND_ANSWER`.
#[derive(Debug, Default, Clone)]
pub struct EchoAnswerModel;

#[async_trait]
impl AnswerModel for EchoAnswerModel {
    async fn complete(&self, _question: &str, passages: &[Passage]) -> Result<String> {
        if passages.is_empty() {
            return Ok(NOT_FOUND_ANSWER.to_string());
        }

        Ok(passages
            .iter()
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(text: &str, page: u32) -> Passage {
        Passage {
            text: text.to_string(),
            document: "report.pdf".to_string(),
            page_number: page,
            snippet: text.to_string(),
            session_id: "s1".to_string(),
        }
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("What was the revenue?", &[passage("Revenue was $5M.", 2)]);
        assert!(prompt.contains("[report.pdf p.2]"));
        assert!(prompt.contains("Revenue was $5M."));
        assert!(prompt.contains("Question: What was the revenue?"));
        assert!(prompt.contains(NOT_FOUND_ANSWER));
    }

    #[tokio::test]
    async fn test_echo_model() {
        let model = EchoAnswerModel;
        let answer = model
            .complete("q", &[passage("first", 1), passage("second", 2)])
            .await
            .unwrap();
        assert_eq!(answer, "first\n\nsecond");

        assert_eq!(model.complete("q", &[]).await.unwrap(), NOT_FOUND_ANSWER);
    }

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Five "},{"text":"million"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(text, "Five million");
    }
}
