//! Knowledge Graph Store - 읽기 전용 인메모리 그래프
//!
//! 모든 조회는 인접 맵을 통한 O(degree) 조회입니다.
//! `related_chunks`만 maxHops로 제한된 BFS를 수행합니다.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{RagError, RagResult};

use super::entity::{extract_entities, normalize_key};
use super::model::{
    Chunk, ChunkId, ContentType, DocId, Document, Edge, Entity, EntityKey, GraphStats, Section,
    SectionId,
};
use super::snapshot::GraphData;

// ============================================================================
// KnowledgeGraph
// ============================================================================

/// 기술 문서 지식 그래프
///
/// 스냅샷에서 한 번 만들어진 후 변경되지 않습니다.
#[derive(Debug)]
pub struct KnowledgeGraph {
    corpus_version: String,
    documents: HashMap<DocId, Document>,
    sections: HashMap<SectionId, Section>,
    chunks: HashMap<ChunkId, Chunk>,
    entities: HashMap<EntityKey, Entity>,
    edges: Vec<Edge>,

    /// chunk -> 언급 엔티티
    chunk_entities: HashMap<ChunkId, BTreeSet<EntityKey>>,
    /// section -> 하위 섹션 포함 청크
    section_chunks: HashMap<SectionId, BTreeSet<ChunkId>>,
    /// chunk -> 자신이 속한 섹션 체인 (가장 깊은 섹션부터)
    chunk_sections: HashMap<ChunkId, Vec<SectionId>>,
    document_chunks: HashMap<DocId, BTreeSet<ChunkId>>,
    /// 양방향으로 펼친 페이지 인접 맵
    adjacency: HashMap<ChunkId, BTreeSet<ChunkId>>,
    table_links: HashMap<ChunkId, BTreeSet<ChunkId>>,
}

impl KnowledgeGraph {
    /// 그래프 데이터 검증 후 인덱스 구성
    ///
    /// 구조 불변식이 깨져 있으면 `CorruptSnapshot`을 반환합니다.
    pub fn from_data(data: GraphData) -> RagResult<Self> {
        let GraphData {
            corpus_version,
            documents,
            sections,
            chunks,
            entities,
            edges,
        } = data;

        let documents = index_unique(documents, |d| d.id.clone(), "document")?;
        let sections = index_unique(sections, |s| s.id.clone(), "section")?;
        let chunks = index_unique(chunks, |c| c.id.clone(), "chunk")?;
        let entities = index_unique(entities, |e| e.key.clone(), "entity")?;

        // Section: 문서와 상위 섹션 확인
        for section in sections.values() {
            if !documents.contains_key(&section.document) {
                return Err(RagError::corrupt(format!(
                    "section {} references unknown document {}",
                    section.id, section.document
                )));
            }
            if let Some(parent_id) = &section.parent {
                let parent = sections.get(parent_id).ok_or_else(|| {
                    RagError::corrupt(format!(
                        "section {} references unknown parent {}",
                        section.id, parent_id
                    ))
                })?;
                if parent.document != section.document {
                    return Err(RagError::corrupt(format!(
                        "section {} and parent {} belong to different documents",
                        section.id, parent_id
                    )));
                }
            }
        }

        // Chunk: 정확히 하나의 소유 문서
        let mut document_chunks: HashMap<DocId, BTreeSet<ChunkId>> = HashMap::new();
        let mut section_chunks: HashMap<SectionId, BTreeSet<ChunkId>> = HashMap::new();
        let mut chunk_sections: HashMap<ChunkId, Vec<SectionId>> = HashMap::new();

        for chunk in chunks.values() {
            if !documents.contains_key(&chunk.document) {
                return Err(RagError::corrupt(format!(
                    "chunk {} references unknown document {}",
                    chunk.id, chunk.document
                )));
            }
            document_chunks
                .entry(chunk.document.clone())
                .or_default()
                .insert(chunk.id.clone());

            if let Some(section_id) = &chunk.section {
                let chain = section_chain(&sections, section_id, &chunk.id)?;
                let owner = &sections[section_id];
                if owner.document != chunk.document {
                    return Err(RagError::corrupt(format!(
                        "chunk {} is owned by document {} but its section {} belongs to {}",
                        chunk.id, chunk.document, section_id, owner.document
                    )));
                }
                for id in &chain {
                    section_chunks
                        .entry(id.clone())
                        .or_default()
                        .insert(chunk.id.clone());
                }
                chunk_sections.insert(chunk.id.clone(), chain);
            }
        }

        // Entity: 정규화 키와 mention 엣지 일관성
        for entity in entities.values() {
            if normalize_key(&entity.key) != entity.key {
                return Err(RagError::corrupt(format!(
                    "entity key {:?} is not normalized",
                    entity.key
                )));
            }
            if entity.chunks.is_empty() {
                return Err(RagError::corrupt(format!(
                    "entity {} is not mentioned by any chunk",
                    entity.key
                )));
            }
        }

        let mut chunk_entities: HashMap<ChunkId, BTreeSet<EntityKey>> = HashMap::new();
        let mut mentioned: HashMap<EntityKey, BTreeSet<ChunkId>> = HashMap::new();
        let mut adjacency: HashMap<ChunkId, BTreeSet<ChunkId>> = HashMap::new();
        let mut table_links: HashMap<ChunkId, BTreeSet<ChunkId>> = HashMap::new();

        for edge in &edges {
            match edge {
                Edge::Mentions { chunk, entity } => {
                    require_chunk(&chunks, chunk, "mentions")?;
                    if !entities.contains_key(entity) {
                        return Err(RagError::corrupt(format!(
                            "chunk {} mentions unknown entity {}",
                            chunk, entity
                        )));
                    }
                    chunk_entities
                        .entry(chunk.clone())
                        .or_default()
                        .insert(entity.clone());
                    mentioned
                        .entry(entity.clone())
                        .or_default()
                        .insert(chunk.clone());
                }
                Edge::AdjacentPage { from, to } => {
                    let a = require_chunk(&chunks, from, "adjacent_page")?;
                    let b = require_chunk(&chunks, to, "adjacent_page")?;
                    if a.document != b.document || a.page.abs_diff(b.page) != 1 {
                        return Err(RagError::corrupt(format!(
                            "adjacent edge {} -> {} is not between consecutive pages of one document",
                            from, to
                        )));
                    }
                    adjacency.entry(from.clone()).or_default().insert(to.clone());
                    adjacency.entry(to.clone()).or_default().insert(from.clone());
                }
                Edge::TableLink {
                    title_chunk,
                    table_chunk,
                } => {
                    require_chunk(&chunks, title_chunk, "table_link")?;
                    let table = require_chunk(&chunks, table_chunk, "table_link")?;
                    if !table.is_table() {
                        return Err(RagError::corrupt(format!(
                            "table link target {} is not a table chunk",
                            table_chunk
                        )));
                    }
                    table_links
                        .entry(title_chunk.clone())
                        .or_default()
                        .insert(table_chunk.clone());
                }
            }
        }

        for entity in entities.values() {
            let from_edges = mentioned.get(&entity.key);
            if from_edges != Some(&entity.chunks) {
                return Err(RagError::corrupt(format!(
                    "entity {} chunk set disagrees with its mention edges",
                    entity.key
                )));
            }
        }

        Ok(Self {
            corpus_version,
            documents,
            sections,
            chunks,
            entities,
            edges,
            chunk_entities,
            section_chunks,
            chunk_sections,
            document_chunks,
            adjacency,
            table_links,
        })
    }

    /// 저장용 데이터로 변환 (id 순 정렬)
    pub fn to_data(&self) -> GraphData {
        GraphData {
            corpus_version: self.corpus_version.clone(),
            documents: sorted_values(&self.documents, |d| &d.id),
            sections: sorted_values(&self.sections, |s| &s.id),
            chunks: sorted_values(&self.chunks, |c| &c.id),
            entities: sorted_values(&self.entities, |e| &e.key),
            edges: self.edges.clone(),
        }
    }

    pub fn corpus_version(&self) -> &str {
        &self.corpus_version
    }

    // ========================================================================
    // Node Lookups
    // ========================================================================

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.get(id)
    }

    pub fn entity(&self, key: &str) -> Option<&Entity> {
        self.entities.get(&normalize_key(key))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// 청크의 가장 깊은 섹션 heading path
    pub fn heading_path(&self, chunk_id: &str) -> Option<&str> {
        let chunk = self.chunks.get(chunk_id)?;
        let section = self.sections.get(chunk.section.as_ref()?)?;
        Some(section.heading_path.as_str())
    }

    /// 청크가 속한 문서의 표시 이름
    pub fn source_name(&self, chunk_id: &str) -> Option<&str> {
        let chunk = self.chunks.get(chunk_id)?;
        self.documents.get(&chunk.document).map(|d| d.name.as_str())
    }

    // ========================================================================
    // Entity Lookups
    // ========================================================================

    /// 질의에서 그래프 어휘에 있는 엔티티만 추출
    ///
    /// 매칭이 없으면 빈 집합 (에러 아님).
    pub fn extract_entities(&self, query: &str) -> BTreeSet<EntityKey> {
        extract_entities(query)
            .into_iter()
            .map(|m| m.key)
            .filter(|key| self.entities.contains_key(key))
            .collect()
    }

    /// 엔티티를 언급하는 청크
    pub fn chunks_for_entity(&self, key: &str) -> BTreeSet<ChunkId> {
        self.entities
            .get(&normalize_key(key))
            .map(|e| e.chunks.clone())
            .unwrap_or_default()
    }

    /// 엔티티를 언급하는 문서 (청크에서 파생)
    pub fn documents_for_entity(&self, key: &str) -> BTreeSet<DocId> {
        let Some(entity) = self.entities.get(&normalize_key(key)) else {
            return BTreeSet::new();
        };
        entity
            .chunks
            .iter()
            .filter_map(|id| self.chunks.get(id))
            .map(|c| c.document.clone())
            .collect()
    }

    // ========================================================================
    // Structural Lookups
    // ========================================================================

    /// 섹션 (하위 섹션 포함)의 청크
    pub fn chunks_in_section(&self, section_id: &str) -> BTreeSet<ChunkId> {
        self.section_chunks.get(section_id).cloned().unwrap_or_default()
    }

    /// 같은 문서 ±1 페이지 청크 (저장 방향과 무관)
    pub fn adjacent_chunks(&self, chunk_id: &str) -> BTreeSet<ChunkId> {
        self.adjacency.get(chunk_id).cloned().unwrap_or_default()
    }

    /// 제목 청크에서 연결된 테이블 청크
    pub fn table_links(&self, chunk_id: &str) -> BTreeSet<ChunkId> {
        self.table_links.get(chunk_id).cloned().unwrap_or_default()
    }

    /// 문서 안의 테이블 청크
    pub fn tables_in_document(&self, doc_id: &str) -> Vec<&Chunk> {
        self.document_chunks
            .get(doc_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.chunks.get(id))
            .filter(|c| c.content_type == ContentType::Table)
            .collect()
    }

    /// 공유 엔티티 또는 같은 섹션으로 연결된 청크 (BFS, maxHops 제한)
    ///
    /// 방문 집합으로 순환을 막고, 입력 청크는 결과에서 제외합니다.
    pub fn related_chunks(&self, chunk_id: &str, max_hops: usize) -> BTreeSet<ChunkId> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut related = BTreeSet::new();

        let Some((start, _)) = self.chunks.get_key_value(chunk_id) else {
            return related;
        };

        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(start.as_str());
        queue.push_back((start.as_str(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for neighbour in self.one_hop(current) {
                if visited.insert(neighbour) {
                    related.insert(neighbour.to_string());
                    queue.push_back((neighbour, depth + 1));
                }
            }
        }

        related
    }

    /// 한 단계 이웃: 중요 엔티티 공유 + 같은 섹션
    fn one_hop<'a>(&'a self, chunk_id: &str) -> BTreeSet<&'a str> {
        let mut out = BTreeSet::new();

        for key in self.chunk_entities.get(chunk_id).into_iter().flatten() {
            if let Some(entity) = self.entities.get(key) {
                if entity.kind.is_important() {
                    out.extend(entity.chunks.iter().map(String::as_str));
                }
            }
        }

        for section_id in self.chunk_sections.get(chunk_id).into_iter().flatten() {
            if let Some(members) = self.section_chunks.get(section_id) {
                out.extend(members.iter().map(String::as_str));
            }
        }

        out.remove(chunk_id);
        out
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// 그래프 통계
    pub fn stats(&self) -> GraphStats {
        let mut node_counts = BTreeMap::new();
        node_counts.insert("document".to_string(), self.documents.len());
        node_counts.insert("section".to_string(), self.sections.len());
        node_counts.insert("chunk".to_string(), self.chunks.len());
        node_counts.insert("entity".to_string(), self.entities.len());

        // contains 엣지: 섹션 1개당 1개 (문서 또는 상위 섹션), 청크 1개당 1개
        let contains = self.sections.len() + self.chunks.len();

        GraphStats {
            node_counts,
            edge_count: contains + self.edges.len(),
            entity_count: self.entities.len(),
            section_count: self.sections.len(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn index_unique<T>(
    items: Vec<T>,
    key: impl Fn(&T) -> String,
    kind: &str,
) -> RagResult<HashMap<String, T>> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let id = key(&item);
        if map.insert(id.clone(), item).is_some() {
            return Err(RagError::corrupt(format!("duplicate {} id {}", kind, id)));
        }
    }
    Ok(map)
}

fn require_chunk<'a>(
    chunks: &'a HashMap<ChunkId, Chunk>,
    id: &str,
    relation: &str,
) -> RagResult<&'a Chunk> {
    chunks.get(id).ok_or_else(|| {
        RagError::corrupt(format!("{} edge references unknown chunk {}", relation, id))
    })
}

/// 섹션에서 루트까지의 체인 (순환 감지)
fn section_chain(
    sections: &HashMap<SectionId, Section>,
    start: &str,
    chunk_id: &str,
) -> RagResult<Vec<SectionId>> {
    let mut chain = Vec::new();
    let mut cursor = Some(start.to_string());

    while let Some(id) = cursor {
        let section = sections.get(&id).ok_or_else(|| {
            RagError::corrupt(format!("chunk {} references unknown section {}", chunk_id, id))
        })?;
        if chain.contains(&id) {
            return Err(RagError::corrupt(format!("section cycle at {}", id)));
        }
        chain.push(id);
        cursor = section.parent.clone();
    }

    Ok(chain)
}

fn sorted_values<T: Clone>(map: &HashMap<String, T>, key: impl Fn(&T) -> &String) -> Vec<T> {
    let mut values: Vec<T> = map.values().cloned().collect();
    values.sort_by(|a, b| key(a).cmp(key(b)));
    values
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_data, fixture_graph};

    #[test]
    fn test_entity_lookups() {
        let graph = fixture_graph();

        let chunks = graph.chunks_for_entity("IEC 60815");
        assert_eq!(
            chunks.into_iter().collect::<Vec<_>>(),
            vec!["a-1".to_string(), "b-1".to_string()]
        );

        let docs = graph.documents_for_entity("iec-60815");
        assert_eq!(docs.len(), 2);
        assert!(graph.chunks_for_entity("ISO 9999").is_empty());
    }

    #[test]
    fn test_extract_entities_restricted_to_vocabulary() {
        let graph = fixture_graph();
        let entities = graph.extract_entities("Does IEC 60815 apply, and what about ISO 9999?");
        assert_eq!(entities.into_iter().collect::<Vec<_>>(), vec!["IEC-60815".to_string()]);
        assert!(graph.extract_entities("hello there").is_empty());
    }

    #[test]
    fn test_chunks_in_section_includes_subsections() {
        let graph = fixture_graph();
        let top = graph.chunks_in_section("spec-a.pdf::s4");
        let nested = graph.chunks_in_section("spec-a.pdf::s4.2");
        assert!(nested.is_subset(&top));
        assert!(top.len() > nested.len());
        assert!(top.contains("a-1"));
    }

    #[test]
    fn test_adjacency_is_symmetric() {
        let graph = fixture_graph();
        assert!(graph.adjacent_chunks("a-1").contains("a-2"));
        assert!(graph.adjacent_chunks("a-2").contains("a-1"));
    }

    #[test]
    fn test_related_chunks_excludes_self_and_respects_hops() {
        let graph = fixture_graph();

        let one_hop = graph.related_chunks("a-1", 1);
        assert!(!one_hop.contains("a-1"));
        // IEC-60815 공유
        assert!(one_hop.contains("b-1"));
        // 같은 섹션
        assert!(one_hop.contains("a-2"));
        // b-2는 b-1을 거쳐야 도달
        assert!(!one_hop.contains("b-2"));

        let two_hops = graph.related_chunks("a-1", 2);
        assert!(one_hop.is_subset(&two_hops));
        assert!(two_hops.contains("b-2"));
        assert!(!two_hops.contains("a-1"));

        assert!(graph.related_chunks("a-1", 0).is_empty());
        assert!(graph.related_chunks("missing", 3).is_empty());
    }

    #[test]
    fn test_related_chunks_terminates_on_cycles() {
        // a-1 <-> b-1 은 엔티티 공유로 서로를 가리키는 순환
        let graph = fixture_graph();
        let all = graph.related_chunks("a-1", 1_000);
        assert!(!all.contains("a-1"));
        assert!(all.len() < graph.chunks().count());
    }

    #[test]
    fn test_stats() {
        let graph = fixture_graph();
        let stats = graph.stats();
        assert_eq!(stats.node_counts["document"], 2);
        assert_eq!(stats.node_counts["chunk"], 6);
        assert_eq!(stats.section_count, graph.to_data().sections.len());
        assert_eq!(stats.entity_count, 4);
        assert!(stats.edge_count > stats.node_counts["chunk"]);
    }

    #[test]
    fn test_rejects_dangling_chunk_document() {
        let mut data = fixture_data();
        data.chunks[0].document = "ghost".to_string();
        let err = KnowledgeGraph::from_data(data).unwrap_err();
        assert!(matches!(err, RagError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_rejects_entity_edge_mismatch() {
        let mut data = fixture_data();
        data.entities[0].chunks.insert("a-2".to_string());
        assert!(matches!(
            KnowledgeGraph::from_data(data),
            Err(RagError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_rejects_bad_adjacency() {
        let mut data = fixture_data();
        data.edges.push(Edge::AdjacentPage {
            from: "a-1".to_string(),
            to: "b-1".to_string(),
        });
        assert!(matches!(
            KnowledgeGraph::from_data(data),
            Err(RagError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_rejects_unnormalized_entity() {
        let mut data = fixture_data();
        data.entities[0].key = data.entities[0].key.to_lowercase();
        assert!(KnowledgeGraph::from_data(data).is_err());
    }

    #[test]
    fn test_rejects_duplicate_chunk() {
        let mut data = fixture_data();
        let dup = data.chunks[0].clone();
        data.chunks.push(dup);
        assert!(KnowledgeGraph::from_data(data).is_err());
    }
}
