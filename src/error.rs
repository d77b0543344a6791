//! 에러 타입 - RAG 엔진 에러 분류
//!
//! 백엔드 장애는 대부분 degraded 모드로 흡수되고 경고로만 남습니다.
//! 호출자에게 에러로 보이는 것은 스냅샷 손상, 잘못된 필터, 생성 실패, 취소뿐입니다.

use std::fmt;

use thiserror::Error;

/// 외부 협력 백엔드 구분
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// 키워드 인덱스 (FTS5)
    LexicalIndex,
    /// 벡터 인덱스 (LanceDB)
    VectorIndex,
    /// 임베딩 인코더
    Encoder,
    /// Cross-encoder 리랭커
    Reranker,
    /// 답변 생성 모델
    Generator,
    /// 대화 요약 모델
    Summarizer,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::LexicalIndex => "lexical index",
            Backend::VectorIndex => "vector index",
            Backend::Encoder => "encoder",
            Backend::Reranker => "reranker",
            Backend::Generator => "generator",
            Backend::Summarizer => "summarizer",
        };
        f.write_str(name)
    }
}

/// RAG 엔진 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 백엔드 연결 불가 또는 타임아웃
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// 그래프 스냅샷 무결성 위반 (서비스 시작 불가)
    #[error("corrupt graph snapshot: {0}")]
    CorruptSnapshot(String),

    /// 호출자가 넘긴 필터 형식 오류
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// 컨텍스트 조립 이후 답변 생성 실패
    #[error("generation failed: {reason}")]
    GenerationFailed {
        reason: String,
        /// 진단용 누적 경고
        warnings: Vec<String>,
    },

    /// 호출자에 의해 취소됨
    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn backend(backend: Backend, reason: impl fmt::Display) -> Self {
        RagError::BackendUnavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        RagError::CorruptSnapshot(reason.into())
    }

    pub fn invalid_filter(reason: impl Into<String>) -> Self {
        RagError::InvalidFilter(reason.into())
    }
}

/// 라이브러리 결과 타입
pub type RagResult<T> = std::result::Result<T, RagError>;
