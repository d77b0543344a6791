//! 설정 모듈
//!
//! 점수 블렌딩 상수(0.3/0.7, 1:1:1.5), 후보 개수, 임계값, 타임아웃을
//! 하드코딩하지 않고 모두 이곳에 모읍니다.
//!
//! 로드 순서: 기본값 -> `<data_dir>/config.json` -> 환경변수

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.tdrag/)
///
/// `TDRAG_DATA_DIR` 환경변수가 있으면 우선합니다.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TDRAG_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tdrag")
}

// ============================================================================
// Retrieval Config
// ============================================================================

/// RRF와 rerank 점수를 섞기 전 정규화 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreNormalization {
    /// rrf를 배치 최대값으로 나눠 (0, 1]로 맞추고 rerank 로짓은 그대로 사용
    MaxScaled,
    /// 정규화 없이 원시 값 그대로 블렌딩
    Raw,
}

/// 검색/융합/컨텍스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 키워드 후보 수
    pub lexical_k: usize,
    /// 벡터 후보 수
    pub vector_k: usize,
    /// 그래프 후보 수
    pub graph_k: usize,

    /// RRF 상수 K
    pub rrf_k: f32,
    pub lexical_weight: f32,
    pub vector_weight: f32,
    /// 엔티티 매칭은 정밀도가 높아 가중치를 올림
    pub graph_weight: f32,

    /// 리랭커에 넘길 상위 후보 수
    pub rerank_top_n: usize,
    /// 최종 반환 후보 수
    pub final_top_k: usize,
    /// final = rrf_blend * norm(rrf) + rerank_blend * rerank
    pub rrf_blend: f32,
    pub rerank_blend: f32,
    pub normalization: ScoreNormalization,

    /// top 점수 대비 최소 비율
    pub min_score_ratio: f32,
    /// 컨텍스트 최대 문자 수
    pub max_context_chars: usize,

    /// 이 값을 넘으면 HIGH
    pub high_confidence: f32,
    /// 이 값을 넘으면 MEDIUM
    pub medium_confidence: f32,

    /// 개별 후보 생성기 타임아웃 (ms)
    pub generator_timeout_ms: u64,
    /// 리랭커 배치 호출 타임아웃 (ms)
    pub rerank_timeout_ms: u64,
    /// 답변 생성 타임아웃 (ms)
    pub generation_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_k: 50,
            vector_k: 30,
            graph_k: 20,
            rrf_k: 60.0,
            lexical_weight: 1.0,
            vector_weight: 1.0,
            graph_weight: 1.5,
            rerank_top_n: 30,
            final_top_k: 10,
            rrf_blend: 0.3,
            rerank_blend: 0.7,
            normalization: ScoreNormalization::MaxScaled,
            min_score_ratio: 0.1,
            max_context_chars: 10_000,
            high_confidence: 1.0,
            medium_confidence: 0.3,
            generator_timeout_ms: 5_000,
            rerank_timeout_ms: 10_000,
            generation_timeout_ms: 120_000,
        }
    }
}

impl RetrievalConfig {
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

// ============================================================================
// Memory Config
// ============================================================================

/// 대화 메모리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 세션당 최대 항목 수 (요약 항목 포함)
    pub max_messages: usize,
    /// 요약되지 않은 교환이 이 수에 도달하면 요약
    pub summary_threshold: usize,
    /// 다음 질의에 넘길 최근 교환 수
    pub recent_context: usize,
    /// 최근 컨텍스트 포맷 시 교환당 최대 문자 수
    pub preview_chars: usize,
    /// 이 시간(초) 동안 쓰이지 않은 세션은 정리 대상
    pub session_idle_secs: u64,
    /// 저장소가 유지하는 최대 세션 수 (초과 시 가장 오래 쉰 세션부터 정리)
    pub max_sessions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            summary_threshold: 5,
            recent_context: 3,
            preview_chars: 300,
            session_idle_secs: 3600,
            max_sessions: 1000,
        }
    }
}

// ============================================================================
// Backend Config
// ============================================================================

/// 외부 모델 백엔드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// 리랭커 서버 주소 (`/rerank` 엔드포인트 제공)
    pub rerank_url: String,
    /// 답변 생성 모델
    pub generation_model: String,
    /// 임베딩 차원
    pub embedding_dimension: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rerank_url: "http://localhost:8080".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
            embedding_dimension: 768,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 데이터 디렉토리 (비어 있으면 기본 경로)
    pub data_dir: Option<PathBuf>,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub backends: BackendConfig,
}

impl RagConfig {
    /// 기본 위치에서 설정 로드
    ///
    /// `<data_dir>/config.json`이 없으면 기본값을 사용합니다.
    pub fn load_default() -> Result<Self> {
        let path = get_data_dir().join("config.json");
        Self::load(&path)
    }

    /// 지정 파일에서 설정 로드 후 환경변수 적용
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            tracing::debug!("No config at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// 환경변수 오버라이드
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TDRAG_RERANK_URL") {
            if !url.is_empty() {
                self.backends.rerank_url = url;
            }
        }
        if let Ok(model) = std::env::var("TDRAG_GENERATION_MODEL") {
            if !model.is_empty() {
                self.backends.generation_model = model;
            }
        }
    }

    /// 실제 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    pub fn graph_path(&self) -> PathBuf {
        self.data_dir().join("graph.json")
    }

    pub fn chunk_db_path(&self) -> PathBuf {
        self.data_dir().join("chunks.db")
    }

    pub fn lance_path(&self) -> PathBuf {
        self.data_dir().join("vectors.lance")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_policy() {
        let config = RetrievalConfig::default();
        assert_eq!(config.lexical_k, 50);
        assert_eq!(config.vector_k, 30);
        assert_eq!(config.graph_k, 20);
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.graph_weight, 1.5);
        assert_eq!(config.rerank_top_n, 30);
        assert_eq!(config.final_top_k, 10);
        assert_eq!(config.max_context_chars, 10_000);

        let memory = MemoryConfig::default();
        assert_eq!(memory.max_messages, 10);
        assert_eq!(memory.summary_threshold, 5);
    }

    #[test]
    fn test_partial_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"retrieval": {"graph_weight": 2.0, "normalization": "raw"}, "memory": {"max_messages": 6}}"#,
        )
        .unwrap();

        let config = RagConfig::load(&path).unwrap();
        assert_eq!(config.retrieval.graph_weight, 2.0);
        assert_eq!(config.retrieval.normalization, ScoreNormalization::Raw);
        // 나머지는 기본값
        assert_eq!(config.retrieval.lexical_k, 50);
        assert_eq!(config.memory.max_messages, 6);
        assert_eq!(config.memory.summary_threshold, 5);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.retrieval.final_top_k, 10);
    }

    #[test]
    fn test_paths_follow_data_dir() {
        let config = RagConfig {
            data_dir: Some(PathBuf::from("/tmp/tdrag-test")),
            ..Default::default()
        };
        assert_eq!(config.graph_path(), PathBuf::from("/tmp/tdrag-test/graph.json"));
        assert_eq!(config.chunk_db_path(), PathBuf::from("/tmp/tdrag-test/chunks.db"));
    }
}
