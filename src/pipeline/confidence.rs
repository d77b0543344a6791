//! 신뢰도 판정

use std::fmt;

use serde::Serialize;

use crate::config::RetrievalConfig;

/// 응답 신뢰도
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// SEARCH 이후: top final 점수 기준
    pub fn from_top_score(top_final: Option<f32>, config: &RetrievalConfig) -> Self {
        match top_final {
            None => Confidence::None,
            Some(score) if score > config.high_confidence => Confidence::High,
            Some(score) if score > config.medium_confidence => Confidence::Medium,
            Some(_) => Confidence::Low,
        }
    }

    /// 컨텍스트가 비면 NONE
    pub fn with_context(self, context_empty: bool) -> Self {
        if context_empty {
            Confidence::None
        } else {
            self
        }
    }

    /// GENERATE 이후: 빈 답변은 LOW로 낮춤
    pub fn refine(self, answer: &str) -> Self {
        if answer.trim().is_empty() && self > Confidence::Low {
            Confidence::Low
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "NONE",
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
