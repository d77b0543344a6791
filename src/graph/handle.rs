//! GraphHandle - 활성 스냅샷에 대한 공유 핸들
//!
//! 읽기는 `Arc` 복제로 잠금을 짧게 잡고, 재로딩은 새 그래프를
//! 잠금 밖에서 완성한 뒤 한 번에 교체합니다. 읽는 쪽은 절반만 만들어진
//! 그래프를 볼 수 없습니다.

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::RagResult;

use super::snapshot::load_snapshot;
use super::store::KnowledgeGraph;

#[derive(Debug)]
struct Active {
    generation: u64,
    graph: Arc<KnowledgeGraph>,
}

/// 읽기 전용 그래프 핸들 (다중 reader, 단일 writer 교체)
#[derive(Debug)]
pub struct GraphHandle {
    active: RwLock<Active>,
}

impl GraphHandle {
    /// 이미 만들어진 그래프로 핸들 생성 (generation 1)
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            active: RwLock::new(Active {
                generation: 1,
                graph: Arc::new(graph),
            }),
        }
    }

    /// 스냅샷 파일에서 로드
    ///
    /// 무결성 위반이면 `CorruptSnapshot`을 반환하며, 서비스는 시작하면 안 됩니다.
    pub fn load(path: &Path) -> RagResult<Self> {
        Ok(Self::new(load_snapshot(path)?))
    }

    /// 현재 그래프
    pub fn current(&self) -> Arc<KnowledgeGraph> {
        self.read().graph.clone()
    }

    /// 현재 그래프와 세대 번호
    pub fn current_with_generation(&self) -> (u64, Arc<KnowledgeGraph>) {
        let active = self.read();
        (active.generation, active.graph.clone())
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// 새 그래프로 원자적 교체, 새 세대 번호 반환
    pub fn swap(&self, graph: KnowledgeGraph) -> u64 {
        let graph = Arc::new(graph);
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.generation += 1;
        active.graph = graph;
        tracing::info!("Graph snapshot swapped (generation {})", active.generation);
        active.generation
    }

    /// 스냅샷 파일을 다시 읽어 교체
    ///
    /// 로드에 실패하면 기존 그래프를 그대로 유지합니다.
    pub fn reload(&self, path: &Path) -> RagResult<u64> {
        let graph = load_snapshot(path)?;
        Ok(self.swap(graph))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Active> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================
