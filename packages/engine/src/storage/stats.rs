//! 学生统计数据库操作模块

use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::storage::models::StudentStats;
use crate::storage::{StorageError, StorageResult};

/// 学生统计仓储
///
/// 统计记录在首次加载时创建，之后只更新，不提供删除。
pub struct StatsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StatsRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get(&self, user_id: &str) -> StorageResult<Option<StudentStats>> {
        let conn = self.get_connection()?;

        let stats = conn
            .query_row(
                "SELECT * FROM student_stats WHERE user_id = ?1",
                [user_id],
                StudentStats::from_row,
            )
            .optional()?;

        Ok(stats)
    }

    pub fn get_all(&self) -> StorageResult<Vec<StudentStats>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare("SELECT * FROM student_stats ORDER BY user_id")?;
        let all = stmt
            .query_map([], StudentStats::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(all)
    }

    pub fn put(&self, stats: &StudentStats) -> StorageResult<()> {
        let conn = self.get_connection()?;
        stats.upsert(&conn)
    }

    /// 读取统计，不存在时创建并持久化
    pub fn get_or_create(&self, user_id: &str) -> StorageResult<StudentStats> {
        if let Some(stats) = self.get(user_id)? {
            return Ok(stats);
        }

        let stats = StudentStats::new(user_id);
        self.put(&stats)?;
        tracing::info!(user_id, "created student stats");
        Ok(stats)
    }

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

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory connection");
        migrations::run_migrations(&conn).expect("Failed to run migrations");
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let repo = StatsRepository::new(setup_test_db());

        let created = repo.get_or_create("user-1").unwrap();
        assert_eq!(created.power_points, 0);
        assert_eq!(created.hero_level, 1);

        let mut updated = created.clone();
        updated.apply_xp(120);
        repo.put(&updated).unwrap();

        let again = repo.get_or_create("user-1").unwrap();
        assert_eq!(again.power_points, 120);
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }
}
