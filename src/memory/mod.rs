//! 대화 메모리 - 세션별 제한된 히스토리, 엔티티 이월, 주기적 요약
//!
//! 항목은 교환(질문/답변)과 최대 하나의 요약으로 구성되며 전체 개수는
//! `max_messages`를 넘지 않습니다. 요약되지 않은 교환이 `summary_threshold`에
//! 도달하면 그 교환 전부를 이전 요약과 함께 하나로 접습니다. 요약 항목은 마지막으로
//! 접힌 교환들의 엔티티를 보관해서 접힌 직후의 후속 질문도 엔티티를 이어받습니다.

pub mod session;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MemoryConfig;
use crate::error::{Backend, RagError};
use crate::graph::EntityKey;
use crate::llm::Summarizer;

pub use session::SessionStore;

// ============================================================================
// Types
// ============================================================================

/// 질문/답변 한 쌍
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub entities: BTreeSet<EntityKey>,
    /// 인용된 청크 id
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        entities: BTreeSet<EntityKey>,
        sources: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            entities,
            sources,
            timestamp: Utc::now(),
        }
    }
}

/// 메모리 항목
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryEntry {
    Summary {
        text: String,
        /// 지금까지 접힌 교환 수
        covered: usize,
        /// 마지막으로 접힌 최근 교환들의 엔티티
        entities: BTreeSet<EntityKey>,
        timestamp: DateTime<Utc>,
    },
    Exchange(Exchange),
}

/// 세션 하나의 대화 메모리
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    entries: VecDeque<MemoryEntry>,
    cooccurrence: BTreeMap<(EntityKey, EntityKey), usize>,
    config: MemoryConfig,
}

// ============================================================================
// Impl
// ============================================================================

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            cooccurrence: BTreeMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter().filter_map(|e| match e {
            MemoryEntry::Exchange(exchange) => Some(exchange),
            MemoryEntry::Summary { .. } => None,
        })
    }

    pub fn summary(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            MemoryEntry::Summary { text, .. } => Some(text.as_str()),
            MemoryEntry::Exchange(_) => None,
        })
    }

    /// 아직 요약되지 않은 교환 수
    pub fn unsummarized(&self) -> usize {
        self.exchanges().count()
    }

    /// 교환 기록 후 필요하면 요약
    ///
    /// 요약기가 실패하면 원래 교환을 그대로 두고 경고를 반환합니다.
    pub async fn record(&mut self, exchange: Exchange, summarizer: &dyn Summarizer) -> Vec<String> {
        let mut warnings = Vec::new();

        self.record_cooccurrence(&exchange.entities);
        self.entries.push_back(MemoryEntry::Exchange(exchange));

        if self.config.summary_threshold > 0 && self.unsummarized() >= self.config.summary_threshold {
            if let Err(e) = self.fold(summarizer).await {
                tracing::warn!("Summarization failed, keeping raw turns: {}", e);
                warnings.push(RagError::backend(Backend::Summarizer, e).to_string());
            }
        }

        self.enforce_cap();
        warnings
    }

    /// 요약되지 않은 교환 전부를 이전 요약과 함께 하나의 요약으로 접기
    async fn fold(&mut self, summarizer: &dyn Summarizer) -> anyhow::Result<()> {
        let to_fold: Vec<Exchange> = self.exchanges().cloned().collect();
        if to_fold.is_empty() {
            return Ok(());
        }

        let (previous_covered, previous_entities) = self
            .entries
            .iter()
            .find_map(|e| match e {
                MemoryEntry::Summary {
                    covered, entities, ..
                } => Some((*covered, entities.clone())),
                MemoryEntry::Exchange(_) => None,
            })
            .unwrap_or_default();

        let text = summarizer.summarize(self.summary(), &to_fold).await?;

        let recent = self.config.recent_context;
        let mut entities: BTreeSet<EntityKey> = to_fold
            .iter()
            .rev()
            .take(recent)
            .flat_map(|e| e.entities.iter().cloned())
            .collect();
        if to_fold.len() < recent {
            entities.extend(previous_entities);
        }

        let covered = previous_covered + to_fold.len();
        self.entries.clear();
        self.entries.push_back(MemoryEntry::Summary {
            text,
            covered,
            entities,
            timestamp: Utc::now(),
        });

        tracing::debug!(
            "Folded {} exchanges into summary ({} covered)",
            to_fold.len(),
            covered
        );
        Ok(())
    }

    /// 한도 초과 시 가장 오래된 교환부터 제거 (요약은 유지)
    fn enforce_cap(&mut self) {
        let max = self.config.max_messages.max(1);
        while self.entries.len() > max {
            let oldest_exchange = self
                .entries
                .iter()
                .position(|e| matches!(e, MemoryEntry::Exchange(_)));
            match oldest_exchange {
                Some(index) if self.entries.len() > 1 => {
                    self.entries.remove(index);
                }
                _ => {
                    self.entries.pop_front();
                }
            }
        }
    }

    fn record_cooccurrence(&mut self, entities: &BTreeSet<EntityKey>) {
        let keys: Vec<&EntityKey> = entities.iter().collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                *self
                    .cooccurrence
                    .entry(((*a).clone(), (*b).clone()))
                    .or_default() += 1;
            }
        }
    }

    /// 한 턴 안에서 함께 나온 엔티티 쌍 (키는 정렬된 쌍)
    pub fn cooccurrence(&self) -> &BTreeMap<(EntityKey, EntityKey), usize> {
        &self.cooccurrence
    }

    /// 최근 n개 교환의 엔티티 합집합
    ///
    /// 요약 이후 교환이 n개보다 적으면 요약에 보관된 엔티티로 채웁니다.
    pub fn carried_entities(&self, n: usize) -> BTreeSet<EntityKey> {
        let mut carried = BTreeSet::new();
        let mut taken = 0;
        for entry in self.entries.iter().rev() {
            if taken >= n {
                break;
            }
            match entry {
                MemoryEntry::Exchange(exchange) => {
                    carried.extend(exchange.entities.iter().cloned());
                    taken += 1;
                }
                MemoryEntry::Summary { entities, .. } => {
                    carried.extend(entities.iter().cloned());
                    break;
                }
            }
        }
        carried
    }

    /// 지금까지 요약으로 접힌 교환 수
    pub fn covered(&self) -> usize {
        self.entries
            .iter()
            .find_map(|e| match e {
                MemoryEntry::Summary { covered, .. } => Some(*covered),
                MemoryEntry::Exchange(_) => None,
            })
            .unwrap_or(0)
    }

    /// 질의에서 엔티티가 없으면 최근 교환의 엔티티를 이어받음
    pub fn resolve_entities(&self, query_entities: BTreeSet<EntityKey>) -> BTreeSet<EntityKey> {
        if !query_entities.is_empty() {
            return query_entities;
        }
        let carried = self.carried_entities(self.config.recent_context);
        if !carried.is_empty() {
            tracing::debug!("Carrying over entities from history: {:?}", carried);
        }
        carried
    }

    /// 최근 n개 항목을 생성 프롬프트용 텍스트로
    pub fn get_recent_context(&self, n: usize) -> String {
        let skip = self.entries.len().saturating_sub(n);
        self.entries
            .iter()
            .skip(skip)
            .map(|entry| match entry {
                MemoryEntry::Summary { text, .. } => format!("Summary: {}", text),
                MemoryEntry::Exchange(e) => format!(
                    "User: {}\nAssistant: {}",
                    e.question,
                    preview(&e.answer, self.config.preview_chars)
                ),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cooccurrence.clear();
    }
}

/// 문자 단위 미리보기
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

// ============================================================================
// Tests
// ============================================================================
