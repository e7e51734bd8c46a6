//! 进度账本
//!
//! XP、等级与连续天数。每次修改都先落盘，成功后才替换内存中的统计。

use chrono::{Local, NaiveDate, Utc};

use crate::storage::{Storage, StorageResult, StudentStats};

/// 默认每题 XP
pub const DEFAULT_XP_PER_CORRECT: u64 = 10;
pub const DEFAULT_XP_PER_INCORRECT: u64 = 2;

/// 一次 XP 发放的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAward {
    pub amount: u64,
    pub total: u64,
    pub level: u32,
    pub leveled_up: bool,
}

/// 尚未落盘的统计变更
#[derive(Debug, Clone)]
pub struct StagedProgress {
    pub stats: StudentStats,
    pub leveled_up: bool,
    pub streak_changed: bool,
}

pub struct ProgressionLedger {
    storage: Storage,
    stats: StudentStats,
}

impl ProgressionLedger {
    /// 读取学生统计，首次加载时创建
    pub fn load_or_create(storage: Storage, user_id: &str) -> StorageResult<Self> {
        let stats = storage.stats().get_or_create(user_id)?;
        Ok(Self { storage, stats })
    }

    pub fn stats(&self) -> &StudentStats {
        &self.stats
    }

    /// 替换内存中的统计 (调用方已经持久化)
    pub(crate) fn replace(&mut self, stats: StudentStats) {
        self.stats = stats;
    }

    pub fn award_xp(&mut self, amount: u64) -> StorageResult<XpAward> {
        let mut next = self.stats.clone();
        let leveled_up = next.apply_xp(amount);
        next.updated_at = Utc::now();
        self.persist(next)?;

        if leveled_up {
            tracing::info!(
                user_id = %self.stats.user_id,
                level = self.stats.hero_level,
                power_points = self.stats.power_points,
                "level up"
            );
        }

        Ok(XpAward {
            amount,
            total: self.stats.power_points,
            level: self.stats.hero_level,
            leveled_up,
        })
    }

    /// 以本地日期记录今天的活跃
    pub fn update_streak(&mut self) -> StorageResult<bool> {
        self.update_streak_on(Local::now().date_naive())
    }

    /// 同一天重复调用不写库，返回 false
    pub fn update_streak_on(&mut self, date: NaiveDate) -> StorageResult<bool> {
        let mut next = self.stats.clone();
        if !next.apply_streak(date) {
            return Ok(false);
        }
        next.updated_at = Utc::now();
        self.persist(next)?;

        tracing::debug!(
            user_id = %self.stats.user_id,
            streak = self.stats.streak_count,
            %date,
            "streak updated"
        );
        Ok(true)
    }

    /// 记录解锁的成就，返回实际新增的 id
    pub fn unlock(&mut self, ids: &[String]) -> StorageResult<Vec<String>> {
        let fresh: Vec<String> = ids
            .iter()
            .filter(|id| !self.stats.unlocked_achievements.contains(id.as_str()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(fresh);
        }

        let mut next = self.stats.clone();
        next.unlocked_achievements.extend(fresh.iter().cloned());
        next.updated_at = Utc::now();
        self.persist(next)?;

        tracing::info!(user_id = %self.stats.user_id, achievements = ?fresh, "achievements unlocked");
        Ok(fresh)
    }

    /// 计算一次作答后的统计，不落盘
    ///
    /// 供需要与会话、掌握度一起原子写入的调用方使用，写入成功后调用 `replace`。
    pub fn stage_answer(&self, points: u64, today: NaiveDate) -> StagedProgress {
        let mut stats = self.stats.clone();
        let leveled_up = stats.apply_xp(points);
        let streak_changed = stats.apply_streak(today);
        stats.updated_at = Utc::now();

        StagedProgress {
            stats,
            leveled_up,
            streak_changed,
        }
    }

    fn persist(&mut self, next: StudentStats) -> StorageResult<()> {
        self.storage.stats().put(&next)?;
        self.stats = next;
        Ok(())
    }
}
