//! Session Store - 세션 ID -> (인덱스, 문서 목록, 마지막 활동 시각)
//!
//! 세션 상태를 바꾸는 유일한 지점입니다.
//!
//! 동시성 규칙:
//! - 저장소 전체 맵 잠금(`sessions`)은 포인터 조회/삽입/삭제 동안만 잡고,
//!   await 지점을 넘기지 않습니다. 서로 다른 세션은 서로를 막지 않습니다.
//! - 세션별 `RwLock`: 수집/정리(스위퍼 포함)는 write, 질의는 read.
//!   질의는 완전히 이전 또는 완전히 새 인덱스만 봅니다.
//! - 마지막 활동 시각은 별도 잠금이라 `touch`/`list_stale`이
//!   진행 중인 수집에 막히지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, LockResult, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::index::SessionIndex;
use super::passage::Passage;
use super::vector::VectorStoreFactory;

// ============================================================================
// Types
// ============================================================================

/// 세션 스냅샷 (`get` 결과)
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    /// 수집 순서대로의 문서 이름 (중복 허용)
    pub documents: Vec<String>,
    /// 활성 인덱스 보유 여부
    pub has_index: bool,
    /// 인덱스의 패시지 수
    pub passage_count: usize,
    pub created_at: DateTime<Utc>,
    /// 마지막 활동 이후 경과 시간
    pub idle: Duration,
}

/// 인덱스 설치/추가 결과
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub index: Arc<SessionIndex>,
    /// 갱신 직후의 문서 목록
    pub documents: Vec<String>,
    /// 이번에 추가된 패시지 수
    pub passages_added: usize,
}

#[derive(Debug)]
struct SessionState {
    index: Option<Arc<SessionIndex>>,
    documents: Vec<String>,
    passage_count: usize,
    created_at: DateTime<Utc>,
    /// `clear`로 제거된 슬롯 (대기 중이던 writer는 맵에서 다시 조회)
    evicted: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            index: None,
            documents: Vec::new(),
            passage_count: 0,
            created_at: Utc::now(),
            evicted: false,
        }
    }

    fn reset(&mut self) {
        self.index = None;
        self.documents.clear();
        self.passage_count = 0;
    }
}

#[derive(Debug)]
struct SessionSlot {
    state: Arc<RwLock<SessionState>>,
    last_activity: Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::new())),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *recover(self.last_activity.lock()) = Instant::now();
    }

    fn last_activity(&self) -> Instant {
        *recover(self.last_activity.lock())
    }
}

/// 잠금 poison은 무시하고 내부 값을 사용 (상태는 항상 완결된 단위로만 갱신됨)
fn recover<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SessionReadGuard
// ============================================================================

/// 질의 동안 유지되는 세션 읽기 잠금
///
/// 살아 있는 동안 해당 세션의 인덱스는 교체/삭제되지 않습니다.
pub struct SessionReadGuard {
    session_id: String,
    index: Arc<SessionIndex>,
    guard: OwnedRwLockReadGuard<SessionState>,
}

impl SessionReadGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn index(&self) -> &SessionIndex {
        &self.index
    }

    pub fn documents(&self) -> &[String] {
        &self.guard.documents
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// 세션 저장소
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
    factory: Arc<dyn VectorStoreFactory>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SessionStore {
    /// 새 저장소 생성
    ///
    /// # Arguments
    /// * `factory` - 세션마다 새 벡터 저장소를 만드는 팩토리
    /// * `embedder` - 패시지/질의 임베딩 프로바이더
    pub fn new(factory: Arc<dyn VectorStoreFactory>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            embedder,
        }
    }

    /// 새 세션 ID 생성
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        recover(self.sessions.lock())
    }

    fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions().get(session_id).cloned()
    }

    /// 세션 write 잠금 획득
    ///
    /// 잠금을 기다리기 전에 활동 시각을 갱신하므로, 진행 중인 수집이 있는 세션은
    /// 스위퍼에게 유휴 상태로 보이지 않습니다.
    /// 기다리는 동안 세션이 정리되었다면 맵에서 다시 조회합니다.
    async fn lock_for_write(
        &self,
        session_id: &str,
        create: bool,
    ) -> Result<(Arc<SessionSlot>, OwnedRwLockWriteGuard<SessionState>)> {
        loop {
            let slot = {
                let mut sessions = self.sessions();
                match sessions.get(session_id) {
                    Some(slot) => slot.clone(),
                    None if create => {
                        let slot = Arc::new(SessionSlot::new());
                        sessions.insert(session_id.to_string(), slot.clone());
                        slot
                    }
                    None => return Err(RagError::NoActiveSession(session_id.to_string())),
                }
            };

            slot.touch();
            let guard = slot.state.clone().write_owned().await;
            if !guard.evicted {
                slot.touch();
                return Ok((slot, guard));
            }
        }
    }

    /// 슬롯을 정리됨으로 표시하고 맵에서 제거
    ///
    /// write 잠금을 쥔 채로 호출해야 대기 중인 writer가 새 슬롯을 만듭니다.
    fn detach(&self, session_id: &str, slot: &Arc<SessionSlot>, state: &mut SessionState) {
        state.reset();
        state.evicted = true;

        let mut sessions = self.sessions();
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(session_id);
        }
    }

    /// 세션 인덱스를 새로 만들거나 교체
    ///
    /// 이전 인덱스 저장 공간은 새 패시지 삽입 전에 삭제됩니다.
    /// 이전 인덱스 삭제가 실패하면 세션은 그대로 유지됩니다.
    /// 새 인덱스 구성이 실패하면 세션은 인덱스 없는 빈 상태가 되고,
    /// 이전 인덱스가 없던 세션이라면 저장소에서 제거됩니다.
    pub async fn create_or_replace(
        &self,
        session_id: &str,
        document: &str,
        passages: Vec<Passage>,
    ) -> Result<IndexUpdate> {
        let (slot, mut state) = self.lock_for_write(session_id, true).await?;
        let had_index = state.index.is_some();

        if let Some(old) = state.index.take() {
            if let Err(e) = old.destroy().await {
                state.index = Some(old);
                return Err(e);
            }
            tracing::info!(
                "Evicted previous index of session {} ({} documents)",
                session_id,
                state.documents.len()
            );
        }
        state.reset();

        let store = match self.factory.create(session_id).await {
            Ok(store) => store,
            Err(e) => {
                if !had_index {
                    self.detach(session_id, &slot, &mut state);
                }
                return Err(e);
            }
        };
        let index = Arc::new(SessionIndex::new(session_id, store, self.embedder.clone()));

        let added = match index.insert(passages).await {
            Ok(n) => n,
            Err(e) => {
                if let Err(cleanup) = index.destroy().await {
                    tracing::warn!(
                        "Failed to clean up partial index of session {}: {}",
                        session_id,
                        cleanup
                    );
                }
                if !had_index {
                    self.detach(session_id, &slot, &mut state);
                }
                return Err(e);
            }
        };

        state.index = Some(index.clone());
        state.documents.push(document.to_string());
        state.passage_count = added;
        slot.touch();

        tracing::info!(
            "Installed new index for session {}: {} ({} passages)",
            session_id,
            document,
            added
        );

        Ok(IndexUpdate {
            index,
            documents: state.documents.clone(),
            passages_added: added,
        })
    }

    /// 기존 인덱스에 문서 추가
    ///
    /// 활성 인덱스가 없으면 `NoActiveSession`. 실패 시 인덱스와 문서 목록은 변하지 않습니다.
    pub async fn append_document(
        &self,
        session_id: &str,
        document: &str,
        passages: Vec<Passage>,
    ) -> Result<IndexUpdate> {
        let (slot, mut state) = self.lock_for_write(session_id, false).await?;

        let index = state
            .index
            .clone()
            .ok_or_else(|| RagError::NoActiveSession(session_id.to_string()))?;

        let added = index.insert(passages).await?;

        state.documents.push(document.to_string());
        state.passage_count += added;
        slot.touch();

        tracing::info!(
            "Appended {} to session {} ({} passages, {} documents)",
            document,
            session_id,
            added,
            state.documents.len()
        );

        Ok(IndexUpdate {
            index,
            documents: state.documents.clone(),
            passages_added: added,
        })
    }

    /// 세션 스냅샷 조회
    pub async fn get(&self, session_id: &str) -> Result<Session> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| RagError::SessionNotFound(session_id.to_string()))?;
        let state = slot.state.read().await;

        if state.evicted {
            return Err(RagError::SessionNotFound(session_id.to_string()));
        }

        Ok(Session {
            id: session_id.to_string(),
            documents: state.documents.clone(),
            has_index: state.index.is_some(),
            passage_count: state.passage_count,
            created_at: state.created_at,
            idle: slot.last_activity().elapsed(),
        })
    }

    /// 질의용 읽기 잠금 획득
    ///
    /// 활성 인덱스가 없으면 `NoActiveSession`.
    pub async fn read(&self, session_id: &str) -> Result<SessionReadGuard> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| RagError::NoActiveSession(session_id.to_string()))?;
        let guard = slot.state.clone().read_owned().await;

        if guard.evicted {
            return Err(RagError::NoActiveSession(session_id.to_string()));
        }

        let index = guard
            .index
            .clone()
            .ok_or_else(|| RagError::NoActiveSession(session_id.to_string()))?;

        Ok(SessionReadGuard {
            session_id: session_id.to_string(),
            index,
            guard,
        })
    }

    /// 세션 삭제 (저장 공간 물리 삭제)
    ///
    /// 진행 중인 질의가 끝날 때까지 기다립니다. 저장 공간 삭제가 실패하면
    /// 세션은 남겨두고 `Storage` 에러를 반환합니다.
    ///
    /// # Returns
    /// 세션이 존재해서 삭제되었으면 `true`
    pub async fn clear(&self, session_id: &str) -> Result<bool> {
        self.clear_when(session_id, None).await
    }

    /// 여전히 `older_than`보다 오래 유휴 상태인 경우에만 세션 삭제
    ///
    /// 유휴 시간은 write 잠금을 얻은 뒤 다시 확인합니다. 그 사이 질의나 수집이
    /// 있었다면 삭제하지 않고 `false`를 반환합니다.
    pub async fn clear_if_stale(&self, session_id: &str, older_than: Duration) -> Result<bool> {
        self.clear_when(session_id, Some(older_than)).await
    }

    async fn clear_when(&self, session_id: &str, older_than: Option<Duration>) -> Result<bool> {
        let Some(slot) = self.slot(session_id) else {
            return Ok(false);
        };

        let mut state = slot.state.clone().write_owned().await;
        if state.evicted {
            return Ok(false);
        }

        if let Some(older_than) = older_than {
            let idle = Instant::now().saturating_duration_since(slot.last_activity());
            if idle <= older_than {
                tracing::debug!("Session {} became active again, keeping it", session_id);
                return Ok(false);
            }
        }

        if let Some(index) = &state.index {
            index.destroy().await?;
        }
        self.detach(session_id, &slot, &mut state);

        tracing::info!("Cleared session {}", session_id);
        Ok(true)
    }

    /// 마지막 활동 시각 갱신
    ///
    /// # Returns
    /// 세션이 존재하면 `true`
    pub fn touch(&self, session_id: &str) -> bool {
        match self.slot(session_id) {
            Some(slot) => {
                slot.touch();
                true
            }
            None => false,
        }
    }

    /// 마지막 활동이 `older_than`보다 오래된 세션 목록
    pub fn list_stale(&self, older_than: Duration) -> Vec<String> {
        let now = Instant::now();
        self.sessions()
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.last_activity()) > older_than)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 세션 수
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 세션 ID
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
