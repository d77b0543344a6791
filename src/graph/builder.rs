//! 그래프 빌더 - 인제스천 산출물(추출 JSON)에서 KnowledgeGraph 생성
//!
//! 청크는 이미 잘려 있는 상태로 들어옵니다. 여기서는 계층 구조,
//! 엔티티, 페이지 인접, 테이블 제목 연결만 만듭니다.
//!
//! 입력 형식:
//! ```text
//! { "corpus_version": "2025-01", "chunks": [ { "chunk_id": ..., "file_name": ..., ... } ] }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::tables::{best_table_match, find_table_titles, is_placeholder_header, strip_tags};
use crate::error::RagResult;

use super::entity::extract_entities;
use super::model::{Chunk, ChunkId, ContentType, Document, Edge, Entity, EntityKey, Section};
use super::snapshot::GraphData;
use super::store::KnowledgeGraph;

// ============================================================================
// Ingestion Artifact
// ============================================================================

/// 추출 JSON의 청크 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_name: String,
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub chunk_text: String,
    /// 상위에서 하위 순서의 heading path (예: ["4", "4.2"])
    #[serde(default)]
    pub parent_sections: Vec<String>,
    #[serde(default)]
    pub table_title: Option<String>,
    /// 테이블 셀 행렬 (첫 행은 헤더)
    #[serde(default)]
    pub table_data: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    fn content_type(&self) -> ContentType {
        if self.has_table {
            return ContentType::Table;
        }
        self.content_type
            .as_deref()
            .and_then(ContentType::parse)
            .unwrap_or(ContentType::Text)
    }

    /// 엔티티를 찾을 텍스트 조각 (본문, 테이블 제목, 태그를 벗긴 셀 하나하나)
    fn mention_texts(&self) -> Vec<String> {
        let mut texts = vec![self.chunk_text.clone()];
        texts.extend(self.table_title.clone());
        if let Some(rows) = &self.table_data {
            for (r, row) in rows.iter().enumerate() {
                for cell in row {
                    let cell = strip_tags(cell);
                    if r == 0 && is_placeholder_header(&cell) {
                        continue;
                    }
                    if !cell.is_empty() {
                        texts.push(cell);
                    }
                }
            }
        }
        texts
    }
}

/// 추출 산출물 전체
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionArtifact {
    #[serde(default)]
    pub corpus_version: Option<String>,
    pub chunks: Vec<ChunkRecord>,
}

impl ExtractionArtifact {
    /// 청크 내용의 SHA-256 앞 16자리 (버전이 없는 산출물용)
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for chunk in &self.chunks {
            hasher.update(chunk.chunk_id.as_bytes());
            hasher.update(chunk.file_name.as_bytes());
            hasher.update(chunk.page_number.to_le_bytes());
            hasher.update(chunk.chunk_text.as_bytes());
            for text in chunk.mention_texts().iter().skip(1) {
                hasher.update(text.as_bytes());
            }
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// JSON 파일 읽기
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse artifact: {}", path.display()))
    }
}

// ============================================================================
// GraphBuilder
// ============================================================================

/// 산출물에서 그래프를 만드는 빌더
pub struct GraphBuilder {
    corpus_version: String,
    records: Vec<ChunkRecord>,
}

impl GraphBuilder {
    pub fn new(artifact: ExtractionArtifact) -> Self {
        let corpus_version = match artifact.corpus_version.clone() {
            Some(version) => version,
            None => format!("sha256-{}", artifact.content_hash()),
        };
        Self {
            corpus_version,
            records: artifact.chunks,
        }
    }

    /// 그래프 생성 (결과는 스냅샷 검증을 그대로 통과해야 함)
    pub fn build(self) -> RagResult<KnowledgeGraph> {
        let data = self.build_data();
        let graph = KnowledgeGraph::from_data(data)?;

        let stats = graph.stats();
        tracing::info!(
            "Built graph: {:?} nodes, {} edges, {} entities",
            stats.node_counts,
            stats.edge_count,
            stats.entity_count
        );
        Ok(graph)
    }

    fn build_data(self) -> GraphData {
        let mut documents: BTreeMap<String, Document> = BTreeMap::new();
        let mut sections: BTreeMap<String, Section> = BTreeMap::new();
        let mut chunks: Vec<Chunk> = Vec::with_capacity(self.records.len());
        let mut entities: BTreeMap<EntityKey, Entity> = BTreeMap::new();
        let mut edges: Vec<Edge> = Vec::new();

        for record in self.records {
            let doc_id = record.file_name.clone();
            let doc = documents.entry(doc_id.clone()).or_insert_with(|| Document {
                id: doc_id.clone(),
                name: record.file_name.clone(),
                page_count: 0,
            });
            doc.page_count = doc.page_count.max(record.page_number);

            // doc -> section -> 하위 section 체인
            let mut parent: Option<String> = None;
            for heading in &record.parent_sections {
                let section_id = format!("{}::s{}", doc_id, heading);
                let section = sections.entry(section_id.clone()).or_insert_with(|| Section {
                    id: section_id.clone(),
                    heading_path: heading.clone(),
                    document: doc_id.clone(),
                    parent: parent.clone(),
                    page_start: record.page_number,
                    page_end: record.page_number,
                });
                section.page_start = section.page_start.min(record.page_number);
                section.page_end = section.page_end.max(record.page_number);
                parent = Some(section_id);
            }

            // 엔티티 (본문 + 테이블 제목 + 테이블 셀)
            for text in record.mention_texts() {
                for found in extract_entities(&text) {
                    let entity = entities.entry(found.key.clone()).or_insert_with(|| Entity {
                        key: found.key.clone(),
                        display: found.display,
                        kind: found.kind,
                        chunks: BTreeSet::new(),
                    });
                    if entity.chunks.insert(record.chunk_id.clone()) {
                        edges.push(Edge::Mentions {
                            chunk: record.chunk_id.clone(),
                            entity: found.key,
                        });
                    }
                }
            }

            let content_type = record.content_type();
            chunks.push(Chunk {
                id: record.chunk_id,
                document: doc_id,
                section: parent,
                page: record.page_number,
                content_type,
                text: record.chunk_text,
                embedding: record.embedding,
                table_title: record.table_title,
                table_data: record.table_data,
            });
        }

        edges.extend(adjacency_edges(&chunks));
        edges.extend(table_link_edges(&chunks));
        edges.sort();
        edges.dedup();

        GraphData {
            corpus_version: self.corpus_version,
            documents: documents.into_values().collect(),
            sections: sections.into_values().collect(),
            chunks,
            entities: entities.into_values().collect(),
            edges,
        }
    }
}

/// 같은 문서 연속 페이지 청크 간 엣지 (낮은 페이지 -> 높은 페이지 한 방향만)
fn adjacency_edges(chunks: &[Chunk]) -> Vec<Edge> {
    let mut by_page: BTreeMap<(&str, u32), Vec<&ChunkId>> = BTreeMap::new();
    for chunk in chunks {
        by_page
            .entry((chunk.document.as_str(), chunk.page))
            .or_default()
            .push(&chunk.id);
    }

    let mut edges = Vec::new();
    for ((doc, page), ids) in &by_page {
        let Some(next) = by_page.get(&(*doc, page + 1)) else {
            continue;
        };
        for from in ids {
            for to in next {
                edges.push(Edge::AdjacentPage {
                    from: (*from).clone(),
                    to: (*to).clone(),
                });
            }
        }
    }
    edges
}

/// 본문의 "Table N - 제목"을 같은 페이지 테이블 청크에 연결
fn table_link_edges(chunks: &[Chunk]) -> Vec<Edge> {
    let mut tables: BTreeMap<(&str, u32), Vec<&Chunk>> = BTreeMap::new();
    for chunk in chunks.iter().filter(|c| c.is_table()) {
        tables
            .entry((chunk.document.as_str(), chunk.page))
            .or_default()
            .push(chunk);
    }

    let mut edges = Vec::new();
    for chunk in chunks.iter().filter(|c| !c.is_table()) {
        let Some(candidates) = tables.get(&(chunk.document.as_str(), chunk.page)) else {
            continue;
        };
        for reference in find_table_titles(&chunk.text) {
            if let Some((table, _)) = best_table_match(&reference, candidates.iter().copied()) {
                edges.push(Edge::TableLink {
                    title_chunk: chunk.id.clone(),
                    table_chunk: table.id.clone(),
                });
            }
        }
    }
    edges
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_artifact;

    #[test]
    fn test_build_hierarchy() {
        let graph = GraphBuilder::new(fixture_artifact()).build().unwrap();

        let doc = graph.document("spec-a.pdf").unwrap();
        assert_eq!(doc.page_count, 3);

        let nested = graph.section("spec-a.pdf::s4.2").unwrap();
        assert_eq!(nested.parent.as_deref(), Some("spec-a.pdf::s4"));
        assert_eq!(graph.heading_path("a-2"), Some("4.2"));
    }

    #[test]
    fn test_build_entities_and_adjacency() {
        let graph = GraphBuilder::new(fixture_artifact()).build().unwrap();

        let chunks = graph.chunks_for_entity("IEC-60815");
        assert!(chunks.contains("a-1"));
        assert!(chunks.contains("b-1"));

        assert!(graph.adjacent_chunks("a-1").contains("a-2"));
        assert!(graph.adjacent_chunks("a-2").contains("a-1"));
        // 다른 문서와는 인접하지 않음
        assert!(!graph.adjacent_chunks("a-1").contains("b-1"));
    }

    #[test]
    fn test_build_table_links() {
        let graph = GraphBuilder::new(fixture_artifact()).build().unwrap();
        let links = graph.table_links("a-2");
        assert_eq!(links.into_iter().collect::<Vec<_>>(), vec!["a-2-table".to_string()]);
    }

    #[test]
    fn test_artifact_content_type_fallbacks() {
        let artifact: ExtractionArtifact = serde_json::from_str(
            r#"{"chunks": [
                {"chunk_id": "x", "file_name": "f.pdf", "content_type": "body", "chunk_text": "t"},
                {"chunk_id": "y", "file_name": "f.pdf", "has_table": true, "chunk_text": "| a |"}
            ]}"#,
        )
        .unwrap();
        let graph = GraphBuilder::new(artifact).build().unwrap();
        assert_eq!(graph.chunk("x").unwrap().content_type, ContentType::Text);
        assert_eq!(graph.chunk("y").unwrap().content_type, ContentType::Table);
    }

    #[test]
    fn test_table_cells_yield_entities() {
        let artifact: ExtractionArtifact = serde_json::from_str(
            r#"{"chunks": [
                {"chunk_id": "t", "file_name": "f.pdf", "has_table": true,
                 "chunk_text": "| Item | Standard |",
                 "table_data": [["col_0", "Standard"], ["Insulator", "<b>IEC 61109</b>"], ["Arrester", "BS EN 60099-4"]]}
            ]}"#,
        )
        .unwrap();
        let graph = GraphBuilder::new(artifact).build().unwrap();

        assert!(graph.chunks_for_entity("IEC-61109").contains("t"));
        assert!(graph.chunks_for_entity("BS-EN-60099-4").contains("t"));
        assert_eq!(graph.chunk("t").unwrap().table_data.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_missing_corpus_version_uses_content_hash() {
        let artifact = |text: &str| ExtractionArtifact {
            corpus_version: None,
            chunks: vec![ChunkRecord {
                chunk_id: "x".to_string(),
                file_name: "f.pdf".to_string(),
                page_number: 1,
                content_type: None,
                has_table: false,
                chunk_text: text.to_string(),
                parent_sections: vec![],
                table_title: None,
                table_data: None,
                embedding: None,
            }],
        };

        let first = GraphBuilder::new(artifact("alpha")).build().unwrap();
        let again = GraphBuilder::new(artifact("alpha")).build().unwrap();
        let changed = GraphBuilder::new(artifact("beta")).build().unwrap();

        assert!(first.corpus_version().starts_with("sha256-"));
        assert_eq!(first.corpus_version(), again.corpus_version());
        assert_ne!(first.corpus_version(), changed.corpus_version());
    }
}
