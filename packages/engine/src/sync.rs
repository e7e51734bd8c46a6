//! 同步引擎模块
//!
//! 负责本地状态与远端的同步：
//! - 上传：学生统计、掌握度与所有 COMPLETED 会话组成一个原子批次
//! - 下载：加载时拉取远端学生快照 (设置字段以远端为准)
//! - 调度：后台任务对自动同步做去抖

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use zhangwo_algo::sanitize::sanitize_mastery_map;

use crate::remote::{BatchWrite, RemoteStore, RemoteStudentSnapshot, WriteBatch};
use crate::storage::models::format_datetime;
use crate::storage::{
    mastery, SessionStatus, Storage, StorageResult, StudentStats, LAST_SYNC_TIME_KEY,
};

/// 默认去抖窗口（毫秒）
pub const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 5_000;

/// 同步结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub user_id: String,
    pub sessions_uploaded: usize,
    /// 批次是否被远端确认 (没有可上传内容时也为 true)
    pub committed: bool,
    pub error: Option<String>,
    pub sync_time: DateTime<Utc>,
}

impl SyncReport {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            sessions_uploaded: 0,
            committed: false,
            error: None,
            sync_time: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.committed && self.error.is_none()
    }
}

/// 拉取远端快照的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// 远端不可达，本地状态不变
    Offline,
    /// 远端没有该学生的记录
    NoRemoteProfile,
    /// 只应用了设置字段
    SettingsOnly,
    /// 远端更新：设置、统计与掌握度都取远端
    RemoteNewer,
}

// ==================== SyncEngine ====================

/// 同步引擎
#[derive(Clone)]
pub struct SyncEngine {
    storage: Storage,
    remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(storage: Storage, remote: Arc<dyn RemoteStore>) -> Self {
        Self { storage, remote }
    }

    /// 上传本地状态
    ///
    /// 只有远端确认提交后才把会话标记为 SYNCED；提交失败时什么都不标记，
    /// 下次同步会重新包含同样的会话。本地读写失败以 `Err` 返回。
    pub async fn sync_to_cloud(&self, user_id: &str) -> StorageResult<SyncReport> {
        let mut report = SyncReport::new(user_id);

        let stats = self.storage.stats().get(user_id)?;
        let mastery = self.storage.mastery().get_map(user_id)?;
        let sessions = self
            .storage
            .sessions()
            .by_status(user_id, SessionStatus::Completed)?;

        let mut batch = WriteBatch::new();
        if let Some(stats) = stats {
            batch.push(BatchWrite::MergeStats { stats });
        }
        if !mastery.is_empty() {
            batch.push(BatchWrite::MergeMastery {
                user_id: user_id.to_string(),
                mastery,
            });
        }
        for session in sessions {
            batch.push(BatchWrite::PutSession { session });
        }

        if batch.is_empty() {
            report.committed = true;
            return Ok(report);
        }

        let session_ids = batch.session_ids();
        let writes = batch.len();

        match self.remote.commit(batch).await {
            Ok(()) => {
                let now = Utc::now();
                report.sessions_uploaded = self.storage.sessions().mark_synced(&session_ids, now)?;
                report.committed = true;
                report.sync_time = now;
                self.storage
                    .set_sync_metadata(LAST_SYNC_TIME_KEY, &format_datetime(now))?;

                tracing::info!(
                    user_id,
                    writes,
                    sessions = report.sessions_uploaded,
                    "sync committed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    writes,
                    pending_sessions = session_ids.len(),
                    error = %e,
                    "sync commit failed, will retry"
                );
                report.error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    /// 加载时拉取远端快照
    ///
    /// 设置字段 (年级、布局、章节分配) 总是取远端；统计累计字段和掌握度
    /// 只有在远端快照比本地更新时才取远端。
    pub async fn pull_profile(&self, user_id: &str) -> StorageResult<PullOutcome> {
        let snapshot = match self.remote.fetch_student(user_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(PullOutcome::NoRemoteProfile),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "remote profile unreachable, using local state");
                return Ok(PullOutcome::Offline);
            }
        };

        // 本机没有档案时远端总是较新，否则新建行的时间戳会压过远端
        let (local, created) = match self.storage.stats().get(user_id)? {
            Some(stats) => (stats, false),
            None => (StudentStats::new(user_id), true),
        };
        let (merged, mut remote_mastery, outcome) = merge_snapshot(local, created, snapshot);

        let repaired = sanitize_mastery_map(&mut remote_mastery);
        if repaired > 0 {
            tracing::warn!(user_id, repaired, "remote mastery values out of range were clamped");
        }

        self.storage.transaction(|conn| {
            merged.upsert(conn)?;
            if outcome == PullOutcome::RemoteNewer {
                mastery::upsert_entries(conn, user_id, &remote_mastery)?;
            }
            Ok(())
        })?;
        self.storage
            .set_sync_metadata(LAST_SYNC_TIME_KEY, &format_datetime(Utc::now()))?;

        tracing::info!(user_id, ?outcome, "remote profile applied");
        Ok(outcome)
    }

    /// 上次同步时间
    pub fn last_sync_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self
            .storage
            .get_sync_metadata(LAST_SYNC_TIME_KEY)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

fn merge_snapshot(
    mut local: StudentStats,
    created: bool,
    snapshot: RemoteStudentSnapshot,
) -> (StudentStats, zhangwo_algo::MasteryMap, PullOutcome) {
    let remote_newer = created || snapshot.updated_at > local.updated_at;

    let Some(remote) = snapshot.stats else {
        let outcome = if remote_newer && !snapshot.mastery.is_empty() {
            PullOutcome::RemoteNewer
        } else {
            PullOutcome::SettingsOnly
        };
        return (local, snapshot.mastery, outcome);
    };

    local.grade = remote.grade.clone();
    local.layout = remote.layout.clone();
    local.chapter_assignments = remote.chapter_assignments.clone();

    if !remote_newer {
        return (local, snapshot.mastery, PullOutcome::SettingsOnly);
    }

    local.power_points = remote.power_points;
    local.hero_level = crate::storage::calculate_level(remote.power_points);
    local.streak_count = remote.streak_count;
    local.last_active_date = remote.last_active_date;
    local.activity_log = remote.activity_log;
    local.drill = remote.drill;
    local.unlocked_achievements = remote.unlocked_achievements;
    local.updated_at = snapshot.updated_at;

    (local, snapshot.mastery, PullOutcome::RemoteNewer)
}

// ==================== SyncScheduler ====================

enum SchedulerCommand {
    Notify(String),
}

/// 自动同步调度器
///
/// 每次 `notify` 都会重新开始去抖窗口，窗口结束后执行一次同步。
/// 丢弃时终止后台任务。
pub struct SyncScheduler {
    engine: SyncEngine,
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    report_tx: Arc<watch::Sender<Option<SyncReport>>>,
    report_rx: watch::Receiver<Option<SyncReport>>,
    task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// 在当前 tokio 运行时中启动后台任务
    ///
    /// 不在运行时中时不启动任务，`notify` 变为空操作，`sync_now` 仍可用。
    pub fn spawn(engine: SyncEngine, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = watch::channel(None);
        let report_tx = Arc::new(report_tx);

        let task = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(run_scheduler(
                engine.clone(),
                rx,
                debounce,
                Arc::clone(&report_tx),
            ))),
            Err(_) => {
                tracing::warn!("no tokio runtime, automatic sync disabled");
                None
            }
        };

        Self {
            engine,
            tx,
            report_tx,
            report_rx,
            task,
        }
    }

    /// 请求一次自动同步 (去抖)
    pub fn notify(&self, user_id: &str) {
        if self.task.is_none() {
            return;
        }
        if self
            .tx
            .send(SchedulerCommand::Notify(user_id.to_string()))
            .is_err()
        {
            tracing::warn!(user_id, "sync scheduler stopped, notification dropped");
        }
    }

    /// 立即同步并返回结果
    pub async fn sync_now(&self, user_id: &str) -> StorageResult<SyncReport> {
        let report = self.engine.sync_to_cloud(user_id).await?;
        self.report_tx.send_replace(Some(report.clone()));
        Ok(report)
    }

    /// 订阅每次同步的结果
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncReport>> {
        self.report_rx.clone()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_scheduler(
    engine: SyncEngine,
    mut rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    debounce: Duration,
    report_tx: Arc<watch::Sender<Option<SyncReport>>>,
) {
    let mut pending: Option<String> = None;

    loop {
        let Some(user_id) = pending.clone() else {
            match rx.recv().await {
                Some(SchedulerCommand::Notify(user_id)) => pending = Some(user_id),
                None => break,
            }
            continue;
        };

        tokio::select! {
            command = rx.recv() => match command {
                // Restart the window
                Some(SchedulerCommand::Notify(next)) => pending = Some(next),
                None => break,
            },
            _ = tokio::time::sleep(debounce) => {
                pending = None;
                match engine.sync_to_cloud(&user_id).await {
                    Ok(report) => {
                        report_tx.send_replace(Some(report));
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, error = %e, "automatic sync failed");
                    }
                }
            }
        }
    }

    tracing::debug!("sync scheduler stopped");
}
