//! 成就
//!
//! 固定的声明式成就表。每个成就是一个纯函数判定，只会解锁，从不撤销。

use serde::Serialize;
use std::collections::BTreeSet;
use zhangwo_algo::{MasteryMap, MASTERY_THRESHOLD};

use crate::storage::StudentStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementCategory {
    Streak,
    Level,
    Mastery,
    Activity,
}

/// 判定时可见的状态
pub struct AchievementContext<'a> {
    pub mastery: &'a MasteryMap,
    pub stats: &'a StudentStats,
}

impl AchievementContext<'_> {
    /// 掌握度达到阈值的技能数
    pub fn mastered_skills(&self) -> usize {
        self.mastery
            .values()
            .filter(|&&value| value >= MASTERY_THRESHOLD)
            .count()
    }
}

pub struct Achievement {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub category: AchievementCategory,
    pub criterion: fn(&AchievementContext<'_>) -> bool,
}

impl std::fmt::Debug for Achievement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Achievement")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish()
    }
}

pub static ACHIEVEMENTS: &[Achievement] = &[
    Achievement {
        id: "first-answer",
        title: "First Steps",
        description: "Answer your first question",
        category: AchievementCategory::Activity,
        criterion: |ctx| !ctx.stats.activity_log.is_empty(),
    },
    Achievement {
        id: "streak-3",
        title: "Warming Up",
        description: "Practice three days in a row",
        category: AchievementCategory::Streak,
        criterion: |ctx| ctx.stats.streak_count >= 3,
    },
    Achievement {
        id: "streak-7",
        title: "Week Warrior",
        description: "Practice seven days in a row",
        category: AchievementCategory::Streak,
        criterion: |ctx| ctx.stats.streak_count >= 7,
    },
    Achievement {
        id: "streak-30",
        title: "Unstoppable",
        description: "Practice thirty days in a row",
        category: AchievementCategory::Streak,
        criterion: |ctx| ctx.stats.streak_count >= 30,
    },
    Achievement {
        id: "level-5",
        title: "Rising Hero",
        description: "Reach level 5",
        category: AchievementCategory::Level,
        criterion: |ctx| ctx.stats.hero_level >= 5,
    },
    Achievement {
        id: "level-10",
        title: "Seasoned Hero",
        description: "Reach level 10",
        category: AchievementCategory::Level,
        criterion: |ctx| ctx.stats.hero_level >= 10,
    },
    Achievement {
        id: "xp-1000",
        title: "Power Surge",
        description: "Earn 1000 power points",
        category: AchievementCategory::Level,
        criterion: |ctx| ctx.stats.power_points >= 1000,
    },
    Achievement {
        id: "mastered-5",
        title: "Skill Collector",
        description: "Master five skills",
        category: AchievementCategory::Mastery,
        criterion: |ctx| ctx.mastered_skills() >= 5,
    },
    Achievement {
        id: "mastered-20",
        title: "Skill Hoarder",
        description: "Master twenty skills",
        category: AchievementCategory::Mastery,
        criterion: |ctx| ctx.mastered_skills() >= 20,
    },
    Achievement {
        id: "active-100",
        title: "Centurion",
        description: "Practice on 100 different days",
        category: AchievementCategory::Activity,
        criterion: |ctx| ctx.stats.activity_log.len() >= 100,
    },
];

pub fn find(id: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|a| a.id == id)
}

/// 返回新满足且尚未解锁的成就，按注册顺序
pub fn check_achievements(
    mastery: &MasteryMap,
    stats: &StudentStats,
    already_unlocked: &BTreeSet<String>,
) -> Vec<&'static Achievement> {
    let ctx = AchievementContext { mastery, stats };

    ACHIEVEMENTS
        .iter()
        .filter(|a| !already_unlocked.contains(a.id))
        .filter(|a| (a.criterion)(&ctx))
        .collect()
}
