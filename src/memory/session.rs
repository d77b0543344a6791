//! 세션 저장소 - 세션 id별 대화 메모리
//!
//! 세션 안의 턴은 세션별 async mutex로 직렬화되고, 세션끼리는 독립적입니다.
//! 새 세션이 들어올 때 `session_idle_secs` 넘게 쉰 세션과 `max_sessions`를 넘는
//! 가장 오래 쉰 세션을 정리합니다. 누군가 핸들을 잡고 있는 세션은 정리하지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::MemoryConfig;

use super::ConversationMemory;

/// 공유 세션 메모리
pub type SessionMemory = Arc<tokio::sync::Mutex<ConversationMemory>>;

struct SessionSlot {
    memory: SessionMemory,
    last_used: Instant,
}

impl SessionSlot {
    /// 저장소 밖에서 핸들을 잡고 있지 않음
    fn is_unheld(&self) -> bool {
        Arc::strong_count(&self.memory) == 1
    }
}

/// 세션 id -> 메모리
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionSlot>>,
    config: MemoryConfig,
}

impl SessionStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 새 세션 생성 (UUID v4)
    pub fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut sessions = self.lock();
        sessions.insert(id.clone(), self.new_slot(now));
        self.evict(&mut sessions, now, &id);
        tracing::debug!("Created session {}", id);
        id
    }

    /// 세션 메모리 (없으면 생성)
    pub fn get_or_create(&self, session_id: &str) -> SessionMemory {
        let now = Instant::now();
        let mut sessions = self.lock();
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.last_used = now;
            return slot.memory.clone();
        }

        let slot = self.new_slot(now);
        let memory = slot.memory.clone();
        sessions.insert(session_id.to_string(), slot);
        self.evict(&mut sessions, now, session_id);
        memory
    }

    pub fn get(&self, session_id: &str) -> Option<SessionMemory> {
        let mut sessions = self.lock();
        let slot = sessions.get_mut(session_id)?;
        slot.last_used = Instant::now();
        Some(slot.memory.clone())
    }

    /// 세션 종료 (메모리 해제)
    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            tracing::debug!("Ended session {}", session_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn new_slot(&self, now: Instant) -> SessionSlot {
        SessionSlot {
            memory: Arc::new(tokio::sync::Mutex::new(ConversationMemory::new(
                self.config.clone(),
            ))),
            last_used: now,
        }
    }

    /// 오래 쉰 세션 정리 후 한도 초과분을 LRU 순으로 정리
    ///
    /// `keep`은 방금 요청된 세션이라 제외합니다.
    fn evict(&self, sessions: &mut HashMap<String, SessionSlot>, now: Instant, keep: &str) -> usize {
        let before = sessions.len();
        let idle_limit = Duration::from_secs(self.config.session_idle_secs);

        sessions.retain(|id, slot| {
            id == keep
                || !slot.is_unheld()
                || now.saturating_duration_since(slot.last_used) < idle_limit
        });

        let max = self.config.max_sessions.max(1);
        while sessions.len() > max {
            let oldest = sessions
                .iter()
                .filter(|(id, slot)| id.as_str() != keep && slot.is_unheld())
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} idle sessions ({} remain)", evicted, sessions.len());
        }
        evicted
    }
}
