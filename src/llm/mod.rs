//! 모델 협력자 트레이트 - 임베딩 / 리랭크 / 답변 생성 / 요약
//!
//! 코어는 모델을 직접 돌리지 않고 이 트레이트들만 호출합니다.
//! 구현체: [`gemini::GeminiClient`] (임베딩, 생성, 요약), [`rerank::HttpReranker`].

pub mod gemini;
pub mod rerank;

use anyhow::Result;
use async_trait::async_trait;

use crate::memory::Exchange;

pub use gemini::{get_api_key, has_api_key, GeminiClient};
pub use rerank::HttpReranker;

/// 답변 생성 시스템 지시문
pub const ANSWER_INSTRUCTION: &str = "You are a technical assistant. Answer using the provided \
context. Cite sources with file name, page, section. If the context does not contain the \
answer, say so.";

/// 대화 요약 시스템 지시문
pub const SUMMARY_INSTRUCTION: &str = "Summarize the conversation below in a few sentences. \
Keep every standard, specification reference and part number that was discussed.";

// ============================================================================
// Traits
// ============================================================================

/// 질의 임베딩 프로바이더
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// Cross-encoder 리랭커
#[async_trait]
pub trait Reranker: Send + Sync {
    /// 입력 순서 그대로 관련도 점수 반환 (길이 = texts.len())
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// 답변 생성 모델
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
}

/// 대화 요약 모델
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// 이전 요약과 교환들을 하나의 요약으로 접기
    async fn summarize(&self, previous: Option<&str>, exchanges: &[Exchange]) -> Result<String>;
}

// ============================================================================
// Prompt Helpers
// ============================================================================

/// 생성 프롬프트 본문
pub fn answer_prompt(question: &str, context: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}

/// 요약 프롬프트 본문
pub fn summary_prompt(previous: Option<&str>, exchanges: &[Exchange]) -> String {
    let mut prompt = String::new();
    if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
        prompt.push_str("Earlier summary:\n");
        prompt.push_str(previous);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Conversation:\n");
    for exchange in exchanges {
        prompt.push_str(&format!("User: {}\nAssistant: {}\n", exchange.question, exchange.answer));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_prompt_layout() {
        let prompt = answer_prompt("What creepage?", "[a.pdf | Page 1 | 4 | text]\nbody");
        assert!(prompt.starts_with("Context:\n[a.pdf"));
        assert!(prompt.ends_with("Question: What creepage?"));
    }

    #[test]
    fn test_summary_prompt_includes_previous_summary() {
        let exchanges = vec![Exchange::new("q1", "a1", Default::default(), vec![])];
        let prompt = summary_prompt(Some("earlier"), &exchanges);
        assert!(prompt.starts_with("Earlier summary:\nearlier"));
        assert!(prompt.contains("User: q1\nAssistant: a1"));

        let prompt = summary_prompt(None, &exchanges);
        assert!(prompt.starts_with("Conversation:"));
    }
}
