//! 数据模型定义
//!
//! 定义 SQLite 存储所需的数据结构，以及与数据库交互的方法。

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use zhangwo_algo::DrillProgress;

use crate::storage::StorageResult;

// ============================================================
// SessionStatus / SessionType
// ============================================================

/// 会话状态，只能单向推进 ACTIVE -> COMPLETED -> SYNCED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Synced,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Synced => "SYNCED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(SessionStatus::Active),
            "COMPLETED" => Some(SessionStatus::Completed),
            "SYNCED" => Some(SessionStatus::Synced),
            _ => None,
        }
    }

    /// 是否允许转换到 `next`
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Active, SessionStatus::Completed)
                | (SessionStatus::Completed, SessionStatus::Synced)
        )
    }
}

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Practice,
    Drill,
    Review,
    Diagnostic,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Practice => "practice",
            SessionType::Drill => "drill",
            SessionType::Review => "review",
            SessionType::Diagnostic => "diagnostic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "practice" => Some(SessionType::Practice),
            "drill" => Some(SessionType::Drill),
            "review" => Some(SessionType::Review),
            "diagnostic" => Some(SessionType::Diagnostic),
            _ => None,
        }
    }
}

// ============================================================
// QuestionLog - 单题记录
// ============================================================

/// 单题作答记录，追加后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionLog {
    pub question_id: String,
    pub atom_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_id: Option<String>,
    pub is_correct: bool,
    pub duration_ms: u64,
    /// 原子知识点在本题前后的掌握度
    pub mastery_before: f64,
    pub mastery_after: f64,
    /// 选题理由
    pub rationale: String,
    pub answered_at: DateTime<Utc>,
}

// ============================================================
// AssessmentSession - 练习会话
// ============================================================

/// 练习会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    /// 会话唯一标识 (UUID)
    pub id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub bundle_id: String,
    pub status: SessionStatus,
    /// 按作答顺序排列
    pub logs: Vec<QuestionLog>,
    pub points_gained: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl AssessmentSession {
    /// 创建新的 ACTIVE 会话
    pub fn new(user_id: &str, session_type: SessionType, bundle_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_type,
            bundle_id: bundle_id.to_string(),
            status: SessionStatus::Active,
            logs: Vec::new(),
            points_gained: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
            synced_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn correct_count(&self) -> usize {
        self.logs.iter().filter(|log| log.is_correct).count()
    }

    /// 正确率 (百分比)，没有记录时为 0
    pub fn accuracy(&self) -> f64 {
        if self.logs.is_empty() {
            return 0.0;
        }
        self.correct_count() as f64 * 100.0 / self.logs.len() as f64
    }

    /// 空闲时间是否超过 `ttl`
    pub fn is_idle_longer_than(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }

    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        let logs: String = row.get("logs")?;
        let status: String = row.get("status")?;
        let session_type: String = row.get("session_type")?;

        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            session_type: SessionType::parse(&session_type).unwrap_or(SessionType::Practice),
            bundle_id: row.get("bundle_id")?,
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
            logs: serde_json::from_str(&logs).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?,
            points_gained: row.get::<_, i64>("points_gained")?.max(0) as u64,
            started_at: parse_datetime(row.get::<_, String>("started_at")?),
            updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
            completed_at: row
                .get::<_, Option<String>>("completed_at")?
                .map(parse_datetime),
            synced_at: row
                .get::<_, Option<String>>("synced_at")?
                .map(parse_datetime),
        })
    }

    /// 插入或更新完整记录
    pub fn upsert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO assessment_session (
                id, user_id, session_type, bundle_id, status, points_gained,
                logs, started_at, updated_at, completed_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                points_gained = excluded.points_gained,
                logs = excluded.logs,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at,
                synced_at = excluded.synced_at
            "#,
            params![
                self.id,
                self.user_id,
                self.session_type.as_str(),
                self.bundle_id,
                self.status.as_str(),
                self.points_gained as i64,
                serde_json::to_string(&self.logs)?,
                format_datetime(self.started_at),
                format_datetime(self.updated_at),
                self.completed_at.map(format_datetime),
                self.synced_at.map(format_datetime),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// StudentStats - 学生统计
// ============================================================

/// 每 100 XP 的平方根对应一级
const XP_PER_LEVEL_UNIT: f64 = 100.0;

/// 由累计 XP 计算等级: floor(sqrt(xp / 100)) + 1
pub fn calculate_level(power_points: u64) -> u32 {
    ((power_points as f64 / XP_PER_LEVEL_UNIT).sqrt().floor() as u32).saturating_add(1)
}

/// 学生统计 (首次加载时创建，从不删除)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStats {
    pub user_id: String,
    /// 累计 XP，只增不减
    pub power_points: u64,
    /// 总是由 power_points 重新计算
    pub hero_level: u32,
    pub streak_count: u32,
    pub last_active_date: Option<NaiveDate>,
    /// 有练习记录的日期
    #[serde(default)]
    pub activity_log: BTreeSet<NaiveDate>,
    /// 学科 ID -> 已分配章节 ID
    #[serde(default)]
    pub chapter_assignments: BTreeMap<String, Vec<String>>,
    /// 动态内容包 ID -> 训练进度
    #[serde(default)]
    pub drill: BTreeMap<String, DrillProgress>,
    #[serde(default)]
    pub unlocked_achievements: BTreeSet<String>,
    pub grade: Option<String>,
    pub layout: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StudentStats {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            power_points: 0,
            hero_level: 1,
            streak_count: 0,
            last_active_date: None,
            activity_log: BTreeSet::new(),
            chapter_assignments: BTreeMap::new(),
            drill: BTreeMap::new(),
            unlocked_achievements: BTreeSet::new(),
            grade: None,
            layout: None,
            updated_at: Utc::now(),
        }
    }

    /// 增加 XP 并重算等级，返回是否升级
    pub fn apply_xp(&mut self, amount: u64) -> bool {
        let before = self.hero_level;
        self.power_points = self.power_points.saturating_add(amount);
        self.hero_level = calculate_level(self.power_points);
        self.hero_level > before
    }

    /// 记录某天的活跃，返回连续天数是否发生变化
    ///
    /// 同一天重复调用不产生变化；昨天活跃则 +1；否则重置为 1。
    pub fn apply_streak(&mut self, today: NaiveDate) -> bool {
        if self.last_active_date == Some(today) {
            return false;
        }

        let yesterday = today.pred_opt();
        self.streak_count = match self.last_active_date {
            Some(last) if Some(last) == yesterday => self.streak_count.saturating_add(1),
            _ => 1,
        };
        self.last_active_date = Some(today);
        self.activity_log.insert(today);
        true
    }

    /// 学科的章节分配，未分配返回 None
    pub fn assigned_chapters(&self, subject_id: &str) -> Option<&[String]> {
        self.chapter_assignments.get(subject_id).map(Vec::as_slice)
    }

    /// 动态内容包的训练进度 (不存在时创建)
    pub fn drill_for(&mut self, bundle_id: &str) -> &mut DrillProgress {
        self.drill.entry(bundle_id.to_string()).or_default()
    }

    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            power_points: row.get::<_, i64>("power_points")?.max(0) as u64,
            hero_level: row.get("hero_level")?,
            streak_count: row.get("streak_count")?,
            last_active_date: row
                .get::<_, Option<String>>("last_active_date")?
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            activity_log: json_column(row, "activity_log")?,
            chapter_assignments: json_column(row, "chapter_assignments")?,
            drill: json_column(row, "drill")?,
            unlocked_achievements: json_column(row, "unlocked_achievements")?,
            grade: row.get("grade")?,
            layout: row.get("layout")?,
            updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
        })
    }

    /// 插入或更新
    pub fn upsert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO student_stats (
                user_id, power_points, hero_level, streak_count, last_active_date,
                activity_log, chapter_assignments, drill, unlocked_achievements,
                grade, layout, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                self.user_id,
                self.power_points as i64,
                self.hero_level,
                self.streak_count,
                self.last_active_date.map(|d| d.format("%Y-%m-%d").to_string()),
                serde_json::to_string(&self.activity_log)?,
                serde_json::to_string(&self.chapter_assignments)?,
                serde_json::to_string(&self.drill)?,
                serde_json::to_string(&self.unlocked_achievements)?,
                self.grade,
                self.layout,
                format_datetime(self.updated_at),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// 辅助函数
// ============================================================

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> SqliteResult<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 解析日期时间字符串
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return dt.with_timezone(&Utc);
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return DateTime::from_naive_utc_and_offset(dt, Utc);
    }

    DateTime::<Utc>::UNIX_EPOCH
}

/// 格式化日期时间为 RFC 3339 (毫秒精度)
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
