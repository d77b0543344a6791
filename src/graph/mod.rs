//! Graph 모듈 - 기술 문서 지식 그래프
//!
//! - Model: Document / Section / Chunk / Entity 노드와 타입 엣지
//! - Entity: 우선순위 패턴 테이블 기반 엔티티 추출
//! - Store: 인접 맵 기반 O(degree) 조회 + 제한된 BFS
//! - Builder: 인제스천 산출물에서 그래프 생성
//! - Snapshot: 체크섬 검증되는 버전 스냅샷
//! - Handle: 다중 reader / 단일 writer 원자적 교체

mod builder;
mod entity;
mod handle;
mod model;
mod snapshot;
mod store;

// Re-exports
pub use builder::{ChunkRecord, ExtractionArtifact, GraphBuilder};
pub use entity::{extract_entities, normalize_key, EntityMatch, KNOWN_ABBREVIATIONS};
pub use handle::GraphHandle;
pub use model::{
    Chunk, ChunkId, ContentType, DocId, Document, Edge, Entity, EntityKey, EntityKind,
    GraphStats, Section, SectionId,
};
pub use snapshot::{
    decode_snapshot, encode_snapshot, load_snapshot, save_snapshot, GraphData,
    SNAPSHOT_FORMAT_VERSION,
};
pub use store::KnowledgeGraph;
