//! 컨텍스트 패킹 - 출처 헤더가 붙은 블록을 문자 수 한도까지 채움
//!
//! 블록 형식:
//! ```text
//! [spec-a.pdf | Page 2 | 4.2 | table]
//! Class: A, Creepage: 16 mm/kV
//! ```
//! 셀 행렬이 있는 테이블 청크는 "헤더: 값" 나열로 바꿔 넣습니다.
//! 점수 내림차순으로 넣다가 처음으로 한도를 넘는 블록에서 멈춥니다.
//! 문자 수는 바이트가 아닌 `char` 단위입니다.

use serde::Serialize;

use crate::graph::{Chunk, ChunkId, KnowledgeGraph};

use super::tables::table_to_text;
use super::{ContextItem, ContextRole};

/// 블록 사이 구분자
const BLOCK_SEPARATOR: &str = "\n\n";

/// 패킹된 블록 정보
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackedBlock {
    pub chunk_id: ChunkId,
    pub role: ContextRole,
    pub score: f32,
    pub chars: usize,
}

/// 패킹 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackedContext {
    pub text: String,
    pub blocks: Vec<PackedBlock>,
    /// `text.chars().count()`
    pub char_count: usize,
    /// 한도 때문에 빠진 항목 수
    pub skipped: usize,
}

impl PackedContext {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// 청크 하나의 출처 헤더
pub fn block_header(graph: &KnowledgeGraph, chunk_id: &str) -> Option<String> {
    let chunk = graph.chunk(chunk_id)?;
    let file = graph.source_name(chunk_id).unwrap_or(chunk.document.as_str());
    let section = graph.heading_path(chunk_id).unwrap_or("-");
    Some(format!(
        "[{} | Page {} | {} | {}]",
        file, chunk.page, section, chunk.content_type
    ))
}

/// 블록 본문 (테이블은 셀 행렬을 풀어 쓰고, 비면 원문)
pub fn block_body(chunk: &Chunk) -> String {
    if let Some(rows) = chunk.table_data.as_deref().filter(|_| chunk.is_table()) {
        let rendered = table_to_text(rows);
        if !rendered.is_empty() {
            return rendered;
        }
    }
    chunk.text.trim_end().to_string()
}

/// 점수 내림차순 greedy 패킹
///
/// 동점이면 역할(primary, supporting, table) 순서, 그다음 입력 순서를 유지합니다.
pub fn pack(items: &[ContextItem], graph: &KnowledgeGraph, max_chars: usize) -> PackedContext {
    let mut ordered: Vec<&ContextItem> = items.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.role.cmp(&b.role))
    });

    let mut packed = PackedContext::default();
    for (i, item) in ordered.iter().enumerate() {
        let Some(chunk) = graph.chunk(&item.chunk_id) else {
            continue;
        };
        let body = block_body(chunk);
        if body.trim().is_empty() {
            continue;
        }
        let Some(header) = block_header(graph, &item.chunk_id) else {
            continue;
        };

        let block = format!("{}\n{}", header, body);
        let block_chars = block.chars().count();
        let separator_chars = if packed.blocks.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.chars().count()
        };

        if packed.char_count + separator_chars + block_chars > max_chars {
            packed.skipped = ordered.len() - i;
            tracing::debug!(
                "Context full at {} chars, skipped {} blocks",
                packed.char_count,
                packed.skipped
            );
            break;
        }

        if separator_chars > 0 {
            packed.text.push_str(BLOCK_SEPARATOR);
        }
        packed.text.push_str(&block);
        packed.char_count += separator_chars + block_chars;
        packed.blocks.push(PackedBlock {
            chunk_id: item.chunk_id.clone(),
            role: item.role,
            score: item.score,
            chars: block_chars,
        });
    }

    packed
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_graph;

    fn item(id: &str, score: f32) -> ContextItem {
        ContextItem {
            chunk_id: id.to_string(),
            role: ContextRole::Primary,
            score,
        }
    }

    fn packed_ids(packed: &PackedContext) -> Vec<&str> {
        packed.blocks.iter().map(|b| b.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_block_header_format() {
        let graph = fixture_graph();
        assert_eq!(
            block_header(&graph, "a-2-table").as_deref(),
            Some("[spec-a.pdf | Page 2 | 4.2 | table]")
        );
        assert_eq!(block_header(&graph, "missing"), None);
    }

    #[test]
    fn test_pack_orders_by_score() {
        let graph = fixture_graph();
        let packed = pack(&[item("a-1", 0.2), item("b-1", 0.9), item("a-3", 0.5)], &graph, 10_000);

        assert_eq!(packed_ids(&packed), vec!["b-1", "a-3", "a-1"]);
        assert!(packed.text.starts_with("[spec-b.pdf | Page 4 | 2 | text]\nComposite"));
        assert_eq!(packed.char_count, packed.text.chars().count());
        assert_eq!(packed.skipped, 0);
    }

    #[test]
    fn test_pack_never_exceeds_limit_and_stops_at_first_overflow() {
        let graph = fixture_graph();
        let items = [item("a-1", 0.9), item("a-2", 0.8), item("b-2", 0.1)];

        let first_only = pack(&items[..1], &graph, 10_000).char_count;
        // 두 번째 블록이 들어가지 않는 한도
        let packed = pack(&items, &graph, first_only + 5);

        assert_eq!(packed_ids(&packed), vec!["a-1"]);
        assert_eq!(packed.skipped, 2);
        assert!(packed.char_count <= first_only + 5);

        for limit in [0, 10, 50, 100, 200, 400] {
            let packed = pack(&items, &graph, limit);
            assert!(packed.text.chars().count() <= limit);
        }
    }

    #[test]
    fn test_removing_unpacked_candidate_never_grows_context() {
        let graph = fixture_graph();
        let items = vec![item("a-1", 0.9), item("a-2", 0.8), item("b-1", 0.5), item("b-2", 0.1)];
        let limit = pack(&items[..2], &graph, 10_000).char_count + 3;
        let full = pack(&items, &graph, limit);
        assert_eq!(full.blocks.len(), 2);

        for removed in ["b-1", "b-2"] {
            let fewer: Vec<ContextItem> =
                items.iter().filter(|i| i.chunk_id != removed).cloned().collect();
            assert!(pack(&fewer, &graph, limit).blocks.len() <= full.blocks.len());
        }
    }

    #[test]
    fn test_roles_break_score_ties() {
        let graph = fixture_graph();
        let items = [
            ContextItem {
                chunk_id: "a-2-table".to_string(),
                role: ContextRole::LinkedTable,
                score: 0.5,
            },
            item("a-2", 0.5),
        ];
        let packed = pack(&items, &graph, 10_000);
        assert_eq!(packed_ids(&packed), vec!["a-2", "a-2-table"]);
    }

    #[test]
    fn test_table_block_renders_cells() {
        let graph = fixture_graph();
        let packed = pack(&[item("a-2-table", 0.5)], &graph, 10_000);
        assert_eq!(
            packed.text,
            "[spec-a.pdf | Page 2 | 4.2 | table]\nClass: A, Creepage: 16 mm/kV"
        );

        // 셀 행렬이 없는 청크는 원문 그대로
        let mut chunk = graph.chunk("a-2-table").unwrap().clone();
        chunk.table_data = None;
        assert_eq!(block_body(&chunk), "| Class | Creepage |\n| A | 16 mm/kV |");
    }
}
