//! Eviction Sweeper - 유휴 세션 정리
//!
//! 고정 주기로 보존 기간을 넘긴 세션을 찾아 `SessionStore::clear_if_stale`로 삭제합니다.
//! 목록을 만든 뒤 다시 활동한 세션은 삭제 직전 재확인에서 걸러집니다.
//! 한 세션의 삭제 실패는 로그만 남기고 건너뜁니다. 루프는 멈추지 않습니다.
//!
//! 종료 신호를 받으면 진행 중인 스윕은 끝내고 다음 스윕은 시작하지 않습니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{RagError, Result};
use crate::knowledge::{session_dir_name, SessionStore, SESSION_DIR_SUFFIX};

/// 한 번의 스윕 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 보존 기간을 넘긴 세션 수
    pub scanned: usize,
    pub evicted: usize,
    pub failed: usize,
}

/// 유휴 세션 스위퍼
pub struct Sweeper {
    store: Arc<SessionStore>,
    retention: Duration,
    interval: Duration,
    /// Lance 세션 디렉토리 루트 (고아 디렉토리 정리용)
    storage_root: Option<PathBuf>,
}

impl Sweeper {
    pub fn new(store: Arc<SessionStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
            storage_root: None,
        }
    }

    /// 시작 시 고아 디렉토리를 정리할 루트 지정
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// 스윕 한 번 실행
    pub async fn sweep_once(&self) -> SweepReport {
        let stale = self.store.list_stale(self.retention);
        let mut report = SweepReport {
            scanned: stale.len(),
            ..Default::default()
        };

        for session_id in stale {
            match self.store.clear_if_stale(&session_id, self.retention).await {
                Ok(true) => report.evicted += 1,
                // 그 사이 정리되었거나 다시 활동함
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Failed to evict session {}: {}", session_id, e);
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                "Sweep finished: {} stale, {} evicted, {} failed",
                report.scanned,
                report.evicted,
                report.failed
            );
        } else {
            tracing::debug!("Sweep finished: nothing to evict");
        }

        report
    }

    /// 종료 신호까지 주기적으로 스윕
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Some(root) = &self.storage_root {
            let active: HashSet<String> = self
                .store
                .session_ids()
                .iter()
                .map(|id| session_dir_name(id))
                .collect();

            match prune_orphaned_storage(root, self.retention, &active).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Pruned {} orphaned session directories", n),
                Err(e) => tracing::warn!("Failed to prune orphaned storage: {}", e),
            }
        }

        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Sweeper started (interval {:?}, retention {:?})",
            self.interval,
            self.retention
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // 송신측이 사라져도 종료
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        tracing::info!("Sweeper stopped");
    }

    /// 백그라운드 태스크로 실행
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// 활성 세션에 속하지 않고 `retention`보다 오래된 세션 디렉토리 삭제
///
/// 이전 프로세스가 남긴 `.lance` 디렉토리만 대상입니다.
///
/// # Returns
/// 삭제한 디렉토리 수
pub async fn prune_orphaned_storage(
    root: &Path,
    retention: Duration,
    active: &HashSet<String>,
) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(RagError::Storage(format!(
                "Failed to read {:?}: {}",
                root, e
            )))
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to read {:?}: {}", root, e)))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(SESSION_DIR_SUFFIX) || active.contains(&name) {
            continue;
        }

        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < retention {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove orphaned {:?}: {}", entry.path(), e),
        }
    }

    Ok(removed)
}

// ============================================================================
// Tests
// ============================================================================
