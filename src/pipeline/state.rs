//! 파이프라인 상태 - 단계별 불변 레코드
//!
//! `SEARCH -> BUILD_CONTEXT -> GENERATE -> DONE`
//! 각 단계는 이전 레코드를 소비해서 다음 레코드를 만들고, 경고는 누적됩니다.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::context::PackedContext;
use crate::fusion::ScoredCandidate;
use crate::graph::{EntityKey, KnowledgeGraph};
use crate::retrieval::SearchFilter;

use super::confidence::Confidence;

/// 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Search,
    BuildContext,
    Generate,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Search => "SEARCH",
            Stage::BuildContext => "BUILD_CONTEXT",
            Stage::Generate => "GENERATE",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// 질의 입력
#[derive(Debug, Clone)]
pub struct QueryInput {
    pub question: String,
    pub session_id: Option<String>,
    pub filter: SearchFilter,
}

/// SEARCH 결과
#[derive(Debug, Clone)]
pub struct SearchRecord {
    pub input: QueryInput,
    pub graph: Arc<KnowledgeGraph>,
    pub graph_generation: u64,
    pub entities: BTreeSet<EntityKey>,
    pub results: Vec<ScoredCandidate>,
    pub rerank_degraded: bool,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
}

/// BUILD_CONTEXT 결과
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub search: SearchRecord,
    pub context: PackedContext,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
}

/// GENERATE 결과 (DONE으로 넘어가는 최종 레코드)
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub context: ContextRecord,
    pub answer: String,
    /// 생성 모델을 실제로 호출했는지
    pub generated: bool,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
}

impl SearchRecord {
    pub const STAGE: Stage = Stage::Search;
}

impl ContextRecord {
    pub const STAGE: Stage = Stage::BuildContext;

    pub fn from_search(search: SearchRecord, context: PackedContext, new_warnings: Vec<String>) -> Self {
        let confidence = search.confidence.with_context(context.is_empty());
        let mut warnings = search.warnings.clone();
        warnings.extend(new_warnings);
        Self {
            search,
            context,
            confidence,
            warnings,
        }
    }
}

impl AnswerRecord {
    pub const STAGE: Stage = Stage::Generate;

    pub fn from_context(context: ContextRecord, answer: String, generated: bool) -> Self {
        let confidence = if generated {
            context.confidence.refine(&answer)
        } else {
            context.confidence
        };
        let warnings = context.warnings.clone();
        Self {
            context,
            answer,
            generated,
            confidence,
            warnings,
        }
    }

    pub fn push_warnings(&mut self, warnings: Vec<String>) {
        self.warnings.extend(warnings);
    }
}
