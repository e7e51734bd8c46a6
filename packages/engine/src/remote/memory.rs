//! 进程内远端存储
//!
//! 行为与 HTTP 实现一致 (合并语义、原子批量提交)，另外提供：
//! - 调用计数 (验证缓存命中与重试)
//! - 故障注入 (离线、提交失败)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use zhangwo_algo::{MasteryMap, SubjectBundle};

use super::{
    BatchWrite, ContentVersionEntry, RemoteError, RemoteResult, RemoteStore, RemoteStudentSnapshot,
    WriteBatch,
};
use crate::storage::{AssessmentSession, StudentStats};

#[derive(Default)]
struct MemoryState {
    bundles: HashMap<String, SubjectBundle>,
    versions: HashMap<String, ContentVersionEntry>,
    students: HashMap<String, RemoteStudentSnapshot>,
    sessions: HashMap<String, AssessmentSession>,
}

/// 调用计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub version_reads: usize,
    pub bundle_fetches: usize,
    pub student_fetches: usize,
    pub commit_attempts: usize,
    pub commits: usize,
}

/// 进程内远端存储
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    fail_commits: AtomicBool,
    version_reads: AtomicUsize,
    bundle_fetches: AtomicUsize,
    student_fetches: AtomicUsize,
    commit_attempts: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote store is offline".to_string()));
        }
        Ok(())
    }

    // ========== 数据准备 ==========

    /// 发布内容包及其版本索引
    pub fn seed_bundle(&self, bundle: SubjectBundle) {
        let mut state = self.state();
        state
            .versions
            .insert(bundle.id.clone(), ContentVersionEntry::for_bundle(&bundle));
        state.bundles.insert(bundle.id.clone(), bundle);
    }

    /// 单独改写版本索引，内容包保持不变
    pub fn set_version_entry(&self, entry: ContentVersionEntry) {
        self.state().versions.insert(entry.bundle_id.clone(), entry);
    }

    pub fn set_student(&self, user_id: &str, snapshot: RemoteStudentSnapshot) {
        self.state().students.insert(user_id.to_string(), snapshot);
    }

    // ========== 故障注入 ==========

    /// 离线时所有调用返回网络错误
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 提交失败时批次整体被拒绝，不落任何写入
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    // ========== 观察 ==========

    pub fn counts(&self) -> CallCounts {
        CallCounts {
            version_reads: self.version_reads.load(Ordering::SeqCst),
            bundle_fetches: self.bundle_fetches.load(Ordering::SeqCst),
            student_fetches: self.student_fetches.load(Ordering::SeqCst),
            commit_attempts: self.commit_attempts.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
        }
    }

    pub fn session(&self, session_id: &str) -> Option<AssessmentSession> {
        self.state().sessions.get(session_id).cloned()
    }

    pub fn sessions_for(&self, user_id: &str) -> Vec<AssessmentSession> {
        let mut sessions: Vec<AssessmentSession> = self
            .state()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn student(&self, user_id: &str) -> Option<RemoteStudentSnapshot> {
        self.state().students.get(user_id).cloned()
    }

    pub fn bundle(&self, bundle_id: &str) -> Option<SubjectBundle> {
        self.state().bundles.get(bundle_id).cloned()
    }

    fn apply(state: &mut MemoryState, write: BatchWrite) {
        match write {
            BatchWrite::MergeStats { stats } => {
                let user_id = stats.user_id.clone();
                let snapshot = state
                    .students
                    .entry(user_id)
                    .or_insert_with(empty_snapshot);
                snapshot.updated_at = snapshot.updated_at.max(stats.updated_at);
                snapshot.stats = Some(merge_stats(snapshot.stats.take(), stats));
            }
            BatchWrite::MergeMastery { user_id, mastery } => {
                let snapshot = state
                    .students
                    .entry(user_id)
                    .or_insert_with(empty_snapshot);
                snapshot.mastery.extend(mastery);
            }
            BatchWrite::PutSession { session } => {
                state.sessions.insert(session.id.clone(), session);
            }
            BatchWrite::PutBundle { bundle } => {
                state.bundles.insert(bundle.id.clone(), bundle);
            }
            BatchWrite::PutVersion { entry } => {
                state.versions.insert(entry.bundle_id.clone(), entry);
            }
        }
    }
}

fn empty_snapshot() -> RemoteStudentSnapshot {
    RemoteStudentSnapshot {
        stats: None,
        mastery: MasteryMap::new(),
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// 设备写入的统计合并到远端记录：远端的设置字段保持不变
fn merge_stats(existing: Option<StudentStats>, mut incoming: StudentStats) -> StudentStats {
    if let Some(remote) = existing {
        if remote.grade.is_some() {
            incoming.grade = remote.grade;
        }
        if remote.layout.is_some() {
            incoming.layout = remote.layout;
        }
        if !remote.chapter_assignments.is_empty() {
            incoming.chapter_assignments = remote.chapter_assignments;
        }
    }
    incoming
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn version_entry(&self, bundle_id: &str) -> RemoteResult<Option<ContentVersionEntry>> {
        self.version_reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self.state().versions.get(bundle_id).cloned())
    }

    async fn fetch_bundle(&self, bundle_id: &str) -> RemoteResult<Option<SubjectBundle>> {
        self.bundle_fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self.state().bundles.get(bundle_id).cloned())
    }

    async fn fetch_student(&self, user_id: &str) -> RemoteResult<Option<RemoteStudentSnapshot>> {
        self.student_fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self.state().students.get(user_id).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("injected commit failure".to_string()));
        }

        // Single lock for the whole batch: all writes land together
        let mut state = self.state();
        for write in batch.writes {
            Self::apply(&mut state, write);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
