//! 그래프 데이터 모델 - Document / Section / Chunk / Entity

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub type DocId = String;
pub type SectionId = String;
pub type ChunkId = String;
pub type EntityKey = String;

// ============================================================================
// Content Type
// ============================================================================

/// 청크 콘텐츠 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Table,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
        }
    }

    /// 문자열 파싱 (추출기가 쓰는 `body`도 text로 취급)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "body" => Some(ContentType::Text),
            "table" => Some(ContentType::Table),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// 문서 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// 표시 이름 (파일 경로)
    pub name: String,
    pub page_count: u32,
}

/// 섹션 노드 (heading path 예: "4.2")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub heading_path: String,
    pub document: DocId,
    /// 상위 섹션 (최상위면 None)
    #[serde(default)]
    pub parent: Option<SectionId>,
    pub page_start: u32,
    pub page_end: u32,
}

/// 청크 노드 - 검색/인용의 최소 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document: DocId,
    #[serde(default)]
    pub section: Option<SectionId>,
    pub page: u32,
    pub content_type: ContentType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// 테이블 청크의 제목 메타데이터
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_title: Option<String>,
    /// 테이블 셀 행렬 (첫 행은 헤더)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_data: Option<Vec<Vec<String>>>,
}

impl Chunk {
    pub fn is_table(&self) -> bool {
        self.content_type == ContentType::Table
    }
}

/// 엔티티 종류 (패턴 우선순위 순서)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// 표준 코드 (BS EN 60060-1, IEC 60815, ISO 9001)
    Standard,
    /// 사양서 참조 (SP-NET-SST-501)
    SpecRef,
    /// 부품 번호
    PartNumber,
    /// 알려진 약어
    Abbreviation,
}

impl EntityKind {
    /// 관련 청크 탐색에 쓰이는 엔티티인지 (부품 번호는 색인만)
    pub fn is_important(&self) -> bool {
        !matches!(self, EntityKind::PartNumber)
    }
}

/// 엔티티 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 정규화된 키
    pub key: EntityKey,
    /// 원문 표기
    pub display: String,
    pub kind: EntityKind,
    /// 이 엔티티를 언급하는 청크
    pub chunks: BTreeSet<ChunkId>,
}

// ============================================================================
// Edges
// ============================================================================

/// 명시적으로 저장되는 엣지
///
/// contains 관계는 Section.document / Chunk.section 필드로 표현됩니다.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum Edge {
    /// Chunk -> Entity
    Mentions { chunk: ChunkId, entity: EntityKey },
    /// Chunk -> Chunk (같은 문서, 낮은 페이지 -> 높은 페이지)
    AdjacentPage { from: ChunkId, to: ChunkId },
    /// 제목 청크 -> 테이블 청크
    TableLink { title_chunk: ChunkId, table_chunk: ChunkId },
}

// ============================================================================
// Stats
// ============================================================================

/// 그래프 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_counts: BTreeMap<String, usize>,
    pub edge_count: usize,
    pub entity_count: usize,
    pub section_count: usize,
}
