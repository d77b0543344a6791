//! 그래프 스냅샷 - 버전이 있는 JSON 산출물
//!
//! 저장 형식:
//! ```text
//! { "format_version": 1, "checksum": "<sha256>", "created_at": "...", "graph": { ... } }
//! ```
//! checksum은 `graph` 값을 serde_json으로 직렬화한 바이트의 SHA-256입니다.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};

use super::model::{Chunk, Document, Edge, Entity, Section};
use super::store::KnowledgeGraph;

/// 현재 스냅샷 형식 버전
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Types
// ============================================================================

/// 직렬화되는 그래프 본문
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub corpus_version: String,
    pub documents: Vec<Document>,
    pub sections: Vec<Section>,
    pub chunks: Vec<Chunk>,
    pub entities: Vec<Entity>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    checksum: String,
    created_at: DateTime<Utc>,
    graph: serde_json::Value,
}

// ============================================================================
// Save / Load
// ============================================================================

/// 스냅샷 바이트 생성
pub fn encode_snapshot(graph: &KnowledgeGraph) -> Result<Vec<u8>> {
    let value =
        serde_json::to_value(graph.to_data()).context("Failed to serialize graph data")?;
    let checksum = checksum_of(&value)?;

    let envelope = SnapshotEnvelope {
        format_version: SNAPSHOT_FORMAT_VERSION,
        checksum,
        created_at: Utc::now(),
        graph: value,
    };

    serde_json::to_vec(&envelope).context("Failed to serialize snapshot")
}

/// 스냅샷 파일 저장
pub fn save_snapshot(graph: &KnowledgeGraph, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create snapshot directory")?;
        }
    }

    let bytes = encode_snapshot(graph)?;

    // 임시 파일에 쓰고 rename (부분 기록된 스냅샷 방지)
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)
        .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into place: {}", path.display()))?;

    tracing::info!(
        "Saved graph snapshot {:?} ({} bytes, corpus {})",
        path,
        bytes.len(),
        graph.corpus_version()
    );
    Ok(())
}

/// 스냅샷 바이트 로드 및 무결성 검증
pub fn decode_snapshot(bytes: &[u8]) -> RagResult<KnowledgeGraph> {
    let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| RagError::corrupt(format!("unreadable snapshot: {}", e)))?;

    if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(RagError::corrupt(format!(
            "unsupported snapshot format version {} (expected {})",
            envelope.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }

    let actual = checksum_of(&envelope.graph)
        .map_err(|e| RagError::corrupt(format!("checksum failed: {}", e)))?;
    if actual != envelope.checksum {
        return Err(RagError::corrupt(format!(
            "checksum mismatch (stored {}, computed {})",
            envelope.checksum, actual
        )));
    }

    let data: GraphData = serde_json::from_value(envelope.graph)
        .map_err(|e| RagError::corrupt(format!("malformed graph body: {}", e)))?;

    KnowledgeGraph::from_data(data)
}

/// 스냅샷 파일 로드
pub fn load_snapshot(path: &Path) -> RagResult<KnowledgeGraph> {
    let bytes = std::fs::read(path)?;
    let graph = decode_snapshot(&bytes)?;

    let stats = graph.stats();
    tracing::info!(
        "Loaded graph snapshot {:?}: {} entities, {} sections, {} edges",
        path,
        stats.entity_count,
        stats.section_count,
        stats.edge_count
    );
    Ok(graph)
}

fn checksum_of(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value).context("Failed to serialize graph for checksum")?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

// ============================================================================
// Tests
// ============================================================================
