//! 会话缓冲
//!
//! 管理单次练习会话的生命周期 `ACTIVE -> COMPLETED -> SYNCED`。
//! 每一步先写入本地数据库，成功后才修改调用方持有的内存状态；
//! 写入失败时内存状态保持不变。

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::storage::{
    AssessmentSession, QuestionLog, SessionStatus, SessionType, Storage, StorageError,
};

/// 默认的放弃会话判定时长（小时）
pub const DEFAULT_ABANDONED_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("user already has an active session: {session_id}")]
    AlreadyActive { session_id: String },

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {session_id} is {status:?}, expected ACTIVE")]
    NotActive {
        session_id: String,
        status: SessionStatus,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// 放弃会话的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonOutcome {
    /// 有作答记录，标记为 COMPLETED 等待上传
    Completed,
    /// 没有作答记录，直接删除
    Discarded,
}

/// 一次清理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: Vec<String>,
    pub discarded: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.discarded.is_empty()
    }
}

/// 会话缓冲
#[derive(Clone)]
pub struct SessionBuffer {
    storage: Storage,
    ttl: Duration,
}

impl SessionBuffer {
    pub fn new(storage: Storage) -> Self {
        Self::with_ttl(storage, Duration::hours(DEFAULT_ABANDONED_TTL_HOURS))
    }

    pub fn with_ttl(storage: Storage, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // ==================== 生命周期 ====================

    /// 创建新的 ACTIVE 会话并落盘
    ///
    /// 先清理过期会话；仍有活跃会话时拒绝创建。
    pub fn start(
        &self,
        user_id: &str,
        session_type: SessionType,
        bundle_id: &str,
    ) -> SessionResult<AssessmentSession> {
        self.sweep_abandoned(user_id)?;

        if let Some(active) = self.active_session(user_id)? {
            return Err(SessionError::AlreadyActive {
                session_id: active.id,
            });
        }

        let session = AssessmentSession::new(user_id, session_type, bundle_id);
        self.storage.sessions().put(&session)?;

        tracing::info!(
            session_id = %session.id,
            user_id,
            bundle_id,
            session_type = session_type.as_str(),
            "session started"
        );
        Ok(session)
    }

    /// 构造追加一条记录后的会话，不落盘
    ///
    /// 供需要与其他状态一起原子写入的调用方使用。
    pub fn stage_log(
        &self,
        session: &AssessmentSession,
        log: QuestionLog,
        points: u64,
    ) -> SessionResult<AssessmentSession> {
        ensure_active(session)?;

        let mut next = session.clone();
        next.logs.push(log);
        next.points_gained = next.points_gained.saturating_add(points);
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// 追加一条作答记录并落盘
    pub fn append_log(
        &self,
        session: &mut AssessmentSession,
        log: QuestionLog,
        points: u64,
    ) -> SessionResult<()> {
        let next = self.stage_log(session, log, points)?;
        self.storage.sessions().put(&next)?;

        tracing::debug!(
            session_id = %next.id,
            logs = next.logs.len(),
            points = next.points_gained,
            "session log appended"
        );
        *session = next;
        Ok(())
    }

    /// ACTIVE -> COMPLETED (不触发网络)
    pub fn complete(&self, session: &mut AssessmentSession) -> SessionResult<()> {
        ensure_active(session)?;

        let now = Utc::now();
        let mut next = session.clone();
        next.status = SessionStatus::Completed;
        next.completed_at = Some(now);
        next.updated_at = now;
        self.storage.sessions().put(&next)?;

        tracing::info!(
            session_id = %next.id,
            questions = next.logs.len(),
            accuracy = next.accuracy(),
            points = next.points_gained,
            "session completed"
        );
        *session = next;
        Ok(())
    }

    /// COMPLETED -> SYNCED，返回实际更新条数
    pub fn mark_synced(&self, ids: &[String]) -> SessionResult<usize> {
        Ok(self.storage.sessions().mark_synced(ids, Utc::now())?)
    }

    // ==================== 查询 ====================

    pub fn get(&self, session_id: &str) -> SessionResult<AssessmentSession> {
        self.storage
            .sessions()
            .get(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// 崩溃恢复：最近开始的 ACTIVE 会话
    pub fn active_session(&self, user_id: &str) -> SessionResult<Option<AssessmentSession>> {
        let active = self
            .storage
            .sessions()
            .by_status(user_id, SessionStatus::Active)?;
        Ok(active.into_iter().max_by_key(|s| s.started_at))
    }

    /// 等待上传的会话
    pub fn completed_sessions(&self, user_id: &str) -> SessionResult<Vec<AssessmentSession>> {
        Ok(self
            .storage
            .sessions()
            .by_status(user_id, SessionStatus::Completed)?)
    }

    // ==================== 放弃与清理 ====================

    /// 立即放弃会话：有记录则完成，否则删除
    pub fn abandon(&self, session: &AssessmentSession) -> SessionResult<AbandonOutcome> {
        ensure_active(session)?;
        let now = Utc::now();

        let outcome = self
            .storage
            .transaction(|conn| resolve_abandoned(conn, session, now))?;

        tracing::info!(session_id = %session.id, ?outcome, "session abandoned");
        Ok(outcome)
    }

    pub fn sweep_abandoned(&self, user_id: &str) -> SessionResult<SweepReport> {
        self.sweep_abandoned_at(user_id, Utc::now())
    }

    /// 处理空闲超过 ttl 的 ACTIVE 会话 (单一事务)
    pub fn sweep_abandoned_at(&self, user_id: &str, now: DateTime<Utc>) -> SessionResult<SweepReport> {
        let stale: Vec<AssessmentSession> = self
            .storage
            .sessions()
            .by_status(user_id, SessionStatus::Active)?
            .into_iter()
            .filter(|s| s.is_idle_longer_than(self.ttl, now))
            .collect();

        if stale.is_empty() {
            return Ok(SweepReport::default());
        }

        let report = self.storage.transaction(|conn| {
            let mut report = SweepReport::default();
            for session in &stale {
                match resolve_abandoned(conn, session, now)? {
                    AbandonOutcome::Completed => report.completed.push(session.id.clone()),
                    AbandonOutcome::Discarded => report.discarded.push(session.id.clone()),
                }
            }
            Ok(report)
        })?;

        tracing::info!(
            user_id,
            completed = report.completed.len(),
            discarded = report.discarded.len(),
            "abandoned sessions swept"
        );
        Ok(report)
    }
}

fn ensure_active(session: &AssessmentSession) -> SessionResult<()> {
    if session.is_active() {
        Ok(())
    } else {
        Err(SessionError::NotActive {
            session_id: session.id.clone(),
            status: session.status,
        })
    }
}

fn resolve_abandoned(
    conn: &rusqlite::Connection,
    session: &AssessmentSession,
    now: DateTime<Utc>,
) -> Result<AbandonOutcome, StorageError> {
    if session.logs.is_empty() {
        conn.execute("DELETE FROM assessment_session WHERE id = ?1", [&session.id])?;
        return Ok(AbandonOutcome::Discarded);
    }

    let mut completed = session.clone();
    completed.status = SessionStatus::Completed;
    completed.completed_at = Some(now);
    completed.updated_at = now;
    completed.upsert(conn)?;
    Ok(AbandonOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(correct: bool) -> QuestionLog {
        QuestionLog {
            question_id: "q1".to_string(),
            atom_id: "halves".to_string(),
            fact_id: None,
            is_correct: correct,
            duration_ms: 900,
            mastery_before: 0.25,
            mastery_after: 0.66,
            rationale: "lowest mastery".to_string(),
            answered_at: Utc::now(),
        }
    }

    fn buffer() -> (SessionBuffer, Storage) {
        let storage = Storage::in_memory().unwrap();
        (SessionBuffer::new(storage.clone()), storage)
    }

    /// 将会话的最后更新时间倒退
    fn age(storage: &Storage, session: &AssessmentSession, hours: i64) -> AssessmentSession {
        let mut old = session.clone();
        old.updated_at = Utc::now() - Duration::hours(hours);
        storage.sessions().put(&old).unwrap();
        old
    }

    #[test]
    fn test_start_persists_active_session() {
        let (buffer, storage) = buffer();
        let session = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();

        let stored = storage.sessions().get(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(buffer.active_session("user-1").unwrap().unwrap().id, session.id);
    }

    #[test]
    fn test_second_start_is_refused() {
        let (buffer, _) = buffer();
        let first = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();

        match buffer.start("user-1", SessionType::Drill, "tables") {
            Err(SessionError::AlreadyActive { session_id }) => assert_eq!(session_id, first.id),
            other => panic!("expected AlreadyActive, got {:?}", other.map(|s| s.id)),
        }

        // Other users are independent
        assert!(buffer.start("user-2", SessionType::Practice, "fractions").is_ok());
    }

    #[test]
    fn test_append_and_complete() {
        let (buffer, storage) = buffer();
        let mut session = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();

        buffer.append_log(&mut session, log(true), 10).unwrap();
        buffer.append_log(&mut session, log(false), 2).unwrap();
        assert_eq!(session.logs.len(), 2);
        assert_eq!(session.points_gained, 12);

        let stored = storage.sessions().get(&session.id).unwrap().unwrap();
        assert_eq!(stored.logs.len(), 2);

        buffer.complete(&mut session).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());

        // No logs after completion
        let err = buffer.append_log(&mut session, log(true), 10).unwrap_err();
        assert!(matches!(err, SessionError::NotActive { .. }));
        assert!(buffer.complete(&mut session).is_err());
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let (buffer, storage) = buffer();
        let mut session = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();

        storage
            .get_connection()
            .unwrap()
            .execute_batch("PRAGMA query_only = ON;")
            .unwrap();

        let err = buffer.append_log(&mut session, log(true), 10).unwrap_err();
        assert!(matches!(err, SessionError::Storage(_)));
        assert!(session.logs.is_empty());
        assert_eq!(session.points_gained, 0);

        assert!(buffer.complete(&mut session).is_err());
        assert!(session.is_active());
    }

    #[test]
    fn test_mark_synced_only_moves_completed() {
        let (buffer, _) = buffer();
        let mut session = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();
        buffer.append_log(&mut session, log(true), 10).unwrap();

        assert_eq!(buffer.mark_synced(&[session.id.clone()]).unwrap(), 0);

        buffer.complete(&mut session).unwrap();
        assert_eq!(buffer.mark_synced(&[session.id.clone()]).unwrap(), 1);
        assert_eq!(buffer.get(&session.id).unwrap().status, SessionStatus::Synced);
        assert!(buffer.completed_sessions("user-1").unwrap().is_empty());
    }

    #[test]
    fn test_sweep_completes_or_discards_stale_sessions() {
        let (buffer, storage) = buffer();

        let with_logs = {
            let mut s = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();
            buffer.append_log(&mut s, log(true), 10).unwrap();
            age(&storage, &s, 30)
        };
        // Old empty session written directly (start refuses a second active one)
        let empty = age(
            &storage,
            &AssessmentSession::new("user-1", SessionType::Drill, "tables"),
            48,
        );

        let report = buffer.sweep_abandoned("user-1").unwrap();
        assert_eq!(report.completed, vec![with_logs.id.clone()]);
        assert_eq!(report.discarded, vec![empty.id.clone()]);

        assert_eq!(buffer.get(&with_logs.id).unwrap().status, SessionStatus::Completed);
        assert!(matches!(buffer.get(&empty.id), Err(SessionError::NotFound(_))));

        // Start now succeeds
        assert!(buffer.start("user-1", SessionType::Practice, "fractions").is_ok());
    }

    #[test]
    fn test_sweep_keeps_fresh_sessions() {
        let (buffer, _) = buffer();
        let session = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();

        let report = buffer.sweep_abandoned("user-1").unwrap();
        assert!(report.is_empty());
        assert!(buffer.get(&session.id).unwrap().is_active());

        let later = Utc::now() + Duration::hours(25);
        let report = buffer.sweep_abandoned_at("user-1", later).unwrap();
        assert_eq!(report.discarded, vec![session.id]);
    }

    #[test]
    fn test_abandon_applies_rule_immediately() {
        let (buffer, _) = buffer();

        let empty = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();
        assert_eq!(buffer.abandon(&empty).unwrap(), AbandonOutcome::Discarded);

        let mut answered = buffer.start("user-1", SessionType::Practice, "fractions").unwrap();
        buffer.append_log(&mut answered, log(false), 2).unwrap();
        assert_eq!(buffer.abandon(&answered).unwrap(), AbandonOutcome::Completed);
        assert_eq!(buffer.completed_sessions("user-1").unwrap().len(), 1);
    }
}
