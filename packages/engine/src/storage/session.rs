//! 练习会话数据库操作模块

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::storage::models::{format_datetime, AssessmentSession, SessionStatus};
use crate::storage::{StorageError, StorageResult};

/// 练习会话仓储
pub struct SessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SessionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    // ========== 基本 CRUD 操作 ==========

    pub fn get(&self, session_id: &str) -> StorageResult<Option<AssessmentSession>> {
        let conn = self.get_connection()?;

        let session = conn
            .query_row(
                "SELECT * FROM assessment_session WHERE id = ?1",
                [session_id],
                AssessmentSession::from_row,
            )
            .optional()?;

        Ok(session)
    }

    /// 用户的全部会话，按开始时间排序
    pub fn get_all(&self, user_id: &str) -> StorageResult<Vec<AssessmentSession>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            "SELECT * FROM assessment_session WHERE user_id = ?1 ORDER BY started_at ASC",
        )?;
        let sessions = stmt
            .query_map([user_id], AssessmentSession::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// 插入或更新完整记录
    pub fn put(&self, session: &AssessmentSession) -> StorageResult<()> {
        let conn = self.get_connection()?;
        session.upsert(&conn)
    }

    pub fn delete(&self, session_id: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute("DELETE FROM assessment_session WHERE id = ?1", [session_id])?;
        Ok(affected > 0)
    }

    // ========== 二级索引查询 ==========

    /// 按状态查询 (idx_session_user_status)
    pub fn by_status(&self, user_id: &str, status: SessionStatus) -> StorageResult<Vec<AssessmentSession>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM assessment_session
            WHERE user_id = ?1 AND status = ?2
            ORDER BY started_at ASC
            "#,
        )?;
        let sessions = stmt
            .query_map(params![user_id, status.as_str()], AssessmentSession::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// 所有用户中处于某状态的会话数 (idx_session_status)
    pub fn count_by_status(&self, status: SessionStatus) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM assessment_session WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 将会话从 COMPLETED 标记为 SYNCED (单一事务)
    ///
    /// 只有仍处于 COMPLETED 的会话会被更新，返回更新条数。
    pub fn mark_synced(&self, ids: &[String], synced_at: DateTime<Utc>) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let at = format_datetime(synced_at);

        let mut updated = 0;
        for id in ids {
            updated += tx.execute(
                r#"
                UPDATE assessment_session
                SET status = 'SYNCED', synced_at = ?1, updated_at = ?1
                WHERE id = ?2 AND status = 'COMPLETED'
                "#,
                params![at, id],
            )?;
        }

        tx.commit()?;
        Ok(updated)
    }

    // ========== 辅助方法 ==========

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;
    use crate::storage::models::SessionType;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory connection");
        migrations::run_migrations(&conn).expect("Failed to run migrations");
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_put_and_get_session() {
        let repo = SessionRepository::new(setup_test_db());
        let session = AssessmentSession::new("user-1", SessionType::Drill, "tables");

        repo.put(&session).unwrap();
        let loaded = repo.get(&session.id).unwrap().expect("session stored");

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.session_type, SessionType::Drill);
        assert_eq!(loaded.status, SessionStatus::Active);
        assert!(loaded.logs.is_empty());
    }

    #[test]
    fn test_by_status_filters_user() {
        let repo = SessionRepository::new(setup_test_db());

        let mut done = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        done.status = SessionStatus::Completed;
        repo.put(&done).unwrap();
        repo.put(&AssessmentSession::new("user-1", SessionType::Practice, "b1"))
            .unwrap();
        let mut other = AssessmentSession::new("user-2", SessionType::Practice, "b1");
        other.status = SessionStatus::Completed;
        repo.put(&other).unwrap();

        let completed = repo.by_status("user-1", SessionStatus::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);
        assert_eq!(repo.count_by_status(SessionStatus::Completed).unwrap(), 2);
        assert_eq!(repo.get_all("user-1").unwrap().len(), 2);
    }

    #[test]
    fn test_unreadable_session_row_is_an_error() {
        let conn = setup_test_db();
        let repo = SessionRepository::new(conn.clone());

        let mut done = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        done.status = SessionStatus::Completed;
        repo.put(&done).unwrap();
        conn.lock()
            .unwrap()
            .execute("UPDATE assessment_session SET logs = 'not json' WHERE id = ?1", [&done.id])
            .unwrap();

        assert!(repo.by_status("user-1", SessionStatus::Completed).is_err());
        assert!(repo.get_all("user-1").is_err());
    }

    #[test]
    fn test_mark_synced_only_touches_completed() {
        let repo = SessionRepository::new(setup_test_db());

        let mut done = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        done.status = SessionStatus::Completed;
        repo.put(&done).unwrap();
        let active = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        repo.put(&active).unwrap();

        let updated = repo
            .mark_synced(&[done.id.clone(), active.id.clone()], Utc::now())
            .unwrap();
        assert_eq!(updated, 1);

        let synced = repo.get(&done.id).unwrap().unwrap();
        assert_eq!(synced.status, SessionStatus::Synced);
        assert!(synced.synced_at.is_some());
        assert_eq!(repo.get(&active.id).unwrap().unwrap().status, SessionStatus::Active);

        // Second call is a no-op
        assert_eq!(repo.mark_synced(&[done.id], Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_delete_session() {
        let repo = SessionRepository::new(setup_test_db());
        let session = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        repo.put(&session).unwrap();

        assert!(repo.delete(&session.id).unwrap());
        assert!(repo.get(&session.id).unwrap().is_none());
    }
}
