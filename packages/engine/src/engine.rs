//! 学习引擎
//!
//! 表现层调用的唯一入口。每个用户构造一次，持有缓存、会话缓冲、进度账本、
//! 选题引擎与同步调度器。所有修改都先完成持久化再更新内存状态。
//!
//! 一次作答的流程：
//! 1. BKT 更新知识点 (以及事实) 的掌握度
//! 2. 会话记录、掌握度变化与学生统计在同一事务中落盘
//! 3. 成就判定
//! 4. 用更新后的掌握度选择下一题；无题可选或达到题数上限时完成会话并通知同步

use chrono::{Local, Utc};
use std::sync::Arc;
use thiserror::Error;
use zhangwo_algo::{
    BktParams, MasteryMap, MasteryUpdate, Question, RecentHistory, Selection, SelectionContext,
    SelectionEngine, SubjectBundle,
};

use crate::achievements::check_achievements;
use crate::cache::{CacheError, ContentCache};
use crate::config::EngineConfig;
use crate::progression::ProgressionLedger;
use crate::remote::{RemoteError, RemoteStore};
use crate::session::{AbandonOutcome, SessionBuffer, SessionError};
use crate::storage::{
    AssessmentSession, QuestionLog, SessionType, Storage, StorageError, StudentStats,
};
use crate::sync::{PullOutcome, SyncEngine, SyncReport, SyncScheduler};

// ============================================================
// 错误类型定义
// ============================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no user loaded")]
    NotLoaded,

    #[error("no active session")]
    NoActiveSession,

    #[error("no question is waiting for an answer")]
    NoPendingQuestion,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================
// 返回给表现层的快照
// ============================================================

/// `load` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub pull: PullOutcome,
    /// 恢复的 ACTIVE 会话
    pub recovered_session: Option<String>,
}

/// 一次作答的结果
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    /// 知识点在前，事实 (如有) 在后
    pub mastery_updates: Vec<MasteryUpdate>,
    pub points_awarded: u64,
    pub leveled_up: bool,
    pub hero_level: u32,
    pub streak_changed: bool,
    pub new_achievements: Vec<String>,
    /// 下一题，`None` 表示会话已完成
    pub next_question: Option<Question>,
    pub rationale: String,
    pub session_complete: bool,
}

// ============================================================
// 内部状态
// ============================================================

struct Profile {
    user_id: String,
    ledger: ProgressionLedger,
    mastery: MasteryMap,
}

struct ActiveSession {
    session: AssessmentSession,
    bundle: SubjectBundle,
    recent: RecentHistory,
    /// 动态内容包的训练进度 (阶段推进在下次作答时落盘)
    drill: zhangwo_algo::DrillProgress,
    current: Option<Selection>,
}

// ============================================================
// LearningEngine
// ============================================================

pub struct LearningEngine {
    config: EngineConfig,
    storage: Storage,
    cache: ContentCache,
    sessions: SessionBuffer,
    selector: SelectionEngine,
    sync: SyncEngine,
    scheduler: SyncScheduler,
    profile: Option<Profile>,
    active: Option<ActiveSession>,
}

impl LearningEngine {
    pub fn new(config: EngineConfig, storage: Storage, remote: Arc<dyn RemoteStore>) -> Self {
        let cache = ContentCache::new(storage.clone(), Arc::clone(&remote));
        let sessions = SessionBuffer::with_ttl(storage.clone(), config.abandoned_session_ttl);
        let selector = SelectionEngine::with_params(config.selection.clone(), config.selection_seed);
        let sync = SyncEngine::new(storage.clone(), remote);
        let scheduler = SyncScheduler::spawn(sync.clone(), config.sync_debounce);

        Self {
            config,
            storage,
            cache,
            sessions,
            selector,
            sync,
            scheduler,
            profile: None,
            active: None,
        }
    }

    // ==================== 加载 ====================

    /// 加载用户：拉取远端快照、读取本地状态、清理并恢复会话
    pub async fn load(&mut self, user_id: &str) -> EngineResult<LoadReport> {
        self.active = None;

        let pull = self.sync.pull_profile(user_id).await?;
        let ledger = ProgressionLedger::load_or_create(self.storage.clone(), user_id)?;
        let mastery = self.storage.mastery().get_map(user_id)?;

        self.profile = Some(Profile {
            user_id: user_id.to_string(),
            ledger,
            mastery,
        });

        self.sessions.sweep_abandoned(user_id)?;
        let recovered_session = match self.sessions.active_session(user_id)? {
            Some(session) => self.recover(session).await?,
            None => None,
        };

        tracing::info!(
            user_id,
            ?pull,
            recovered = recovered_session.is_some(),
            "user loaded"
        );
        Ok(LoadReport {
            pull,
            recovered_session,
        })
    }

    /// 恢复崩溃前的会话；内容包不可用时按放弃处理
    async fn recover(&mut self, session: AssessmentSession) -> EngineResult<Option<String>> {
        let bundle = match self.cache.get_bundle(&session.bundle_id).await {
            Ok(bundle) => bundle,
            Err(CacheError::Unavailable { bundle_id }) => {
                tracing::warn!(session_id = %session.id, bundle_id = %bundle_id, "bundle unavailable, abandoning recovered session");
                self.sessions.abandon(&session)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut recent = RecentHistory::default();
        for log in &session.logs {
            recent.push(log.question_id.clone());
        }
        let drill = self.drill_progress(&bundle.id);
        let session_id = session.id.clone();

        self.active = Some(ActiveSession {
            session,
            bundle,
            recent,
            drill,
            current: None,
        });
        self.advance()?;

        Ok(Some(session_id))
    }

    // ==================== 会话 ====================

    /// 开始新会话并选出第一题
    ///
    /// 一题都选不出时删除空会话，返回的 `Selection` 说明原因。
    pub async fn start_session(
        &mut self,
        bundle_id: &str,
        session_type: SessionType,
    ) -> EngineResult<Selection> {
        let user_id = self.profile()?.user_id.clone();
        let bundle = self.cache.get_bundle(bundle_id).await?;
        let session = self.sessions.start(&user_id, session_type, bundle_id)?;
        let drill = self.drill_progress(bundle_id);

        self.active = Some(ActiveSession {
            session,
            bundle,
            recent: RecentHistory::default(),
            drill,
            current: None,
        });
        self.advance()
    }

    /// 提交当前题目的作答
    pub async fn submit_response(
        &mut self,
        is_correct: bool,
        duration_ms: u64,
    ) -> EngineResult<AnswerOutcome> {
        let bkt: BktParams = self.config.bkt;
        let initial = self.config.selection.initial_mastery;
        let window = self.config.selection.accuracy_window;
        let points = if is_correct {
            self.config.xp_per_correct
        } else {
            self.config.xp_per_incorrect
        };

        let profile = self.profile.as_ref().ok_or(EngineError::NotLoaded)?;
        let active = self.active.as_ref().ok_or(EngineError::NoActiveSession)?;
        let selection = active
            .current
            .as_ref()
            .filter(|_| active.session.is_active())
            .ok_or(EngineError::NoPendingQuestion)?;
        let question = selection
            .question
            .as_ref()
            .ok_or(EngineError::NoPendingQuestion)?;

        // 1. BKT
        let mut mastery = profile.mastery.clone();
        let mut changes = MasteryMap::new();
        let mut updates = Vec::with_capacity(2);

        let atom_update = bkt.apply(&mut mastery, &question.atom_id, is_correct, initial);
        changes.insert(atom_update.skill_key.clone(), atom_update.after);
        if let Some(fact_id) = &question.fact_id {
            let fact_update = bkt.apply(&mut mastery, fact_id, is_correct, initial);
            changes.insert(fact_update.skill_key.clone(), fact_update.after);
            updates.push(atom_update.clone());
            updates.push(fact_update);
        } else {
            updates.push(atom_update.clone());
        }

        // 2. Staged session, stats and drill
        let log = QuestionLog {
            question_id: question.id.clone(),
            atom_id: question.atom_id.clone(),
            fact_id: question.fact_id.clone(),
            is_correct,
            duration_ms,
            mastery_before: atom_update.before,
            mastery_after: atom_update.after,
            rationale: selection.rationale.clone(),
            answered_at: Utc::now(),
        };
        let next_session = self.sessions.stage_log(&active.session, log, points)?;

        let mut staged = profile.ledger.stage_answer(points, Local::now().date_naive());
        let mut drill = active.drill.clone();
        if active.bundle.is_dynamic {
            let stage = if selection.is_review { None } else { selection.stage };
            drill.record_answer(stage, question.fact_id.as_deref(), is_correct, window);
            staged.stats.drill.insert(active.bundle.id.clone(), drill.clone());
        }

        // 3. Achievements
        let unlocked: Vec<String> =
            check_achievements(&mastery, &staged.stats, &staged.stats.unlocked_achievements)
                .into_iter()
                .map(|a| a.id.to_string())
                .collect();
        staged.stats.unlocked_achievements.extend(unlocked.iter().cloned());

        // 4. Durable write, then apply in memory
        self.storage
            .commit_answer(&next_session, &changes, &staged.stats)?;

        let question_id = question.id.clone();
        let user_id = profile.user_id.clone();
        let hero_level = staged.stats.hero_level;

        if let Some(profile) = self.profile.as_mut() {
            profile.mastery = mastery;
            profile.ledger.replace(staged.stats);
        }
        if let Some(active) = self.active.as_mut() {
            active.session = next_session;
            active.drill = drill;
            active.recent.push(question_id);
        }

        tracing::debug!(
            user_id = %user_id,
            is_correct,
            skill = %atom_update.skill_key,
            before = atom_update.before,
            after = atom_update.after,
            "answer recorded"
        );
        if !unlocked.is_empty() {
            tracing::info!(user_id = %user_id, achievements = ?unlocked, "achievements unlocked");
        }

        // 5. Next question or completion
        let next = self.advance()?;
        let session_complete = self.is_session_complete();

        Ok(AnswerOutcome {
            is_correct,
            mastery_updates: updates,
            points_awarded: points,
            leveled_up: staged.leveled_up,
            hero_level,
            streak_changed: staged.streak_changed,
            new_achievements: unlocked,
            next_question: next.question,
            rationale: next.rationale,
            session_complete,
        })
    }

    /// 选择下一题；无题可选或达到上限时完成会话
    ///
    /// 返回本次选择 (包括耗尽时的说明)。
    fn advance(&mut self) -> EngineResult<Selection> {
        let limit = self.config.session_question_limit;
        let (Some(profile), Some(active)) = (self.profile.as_ref(), self.active.as_mut()) else {
            return Ok(Selection::exhausted("No active session"));
        };

        let selection = if active.session.logs.len() >= limit {
            Selection::exhausted(format!("Session limit of {limit} questions reached"))
        } else {
            let ActiveSession {
                bundle,
                recent,
                drill,
                ..
            } = &mut *active;
            let mut ctx = SelectionContext::new(bundle, &profile.mastery, recent);
            ctx.assigned_chapters = profile.ledger.stats().assigned_chapters(&bundle.id);
            if bundle.is_dynamic {
                ctx = ctx.with_drill(drill);
            }
            self.selector.select_next(ctx)
        };

        if selection.is_exhausted() {
            active.current = None;
            if active.session.logs.is_empty() {
                // Nothing was ever asked
                self.sessions.abandon(&active.session)?;
                tracing::info!(session_id = %active.session.id, rationale = %selection.rationale, "empty session discarded");
                self.active = None;
                return Ok(selection);
            }

            self.sessions.complete(&mut active.session)?;
            self.scheduler.notify(&profile.user_id);
            tracing::info!(session_id = %active.session.id, rationale = %selection.rationale, "session exhausted");
            return Ok(selection);
        }

        tracing::debug!(
            target_skill = ?selection.target,
            is_review = selection.is_review,
            rationale = %selection.rationale,
            "question selected"
        );
        active.current = Some(selection.clone());
        Ok(selection)
    }

    /// 放弃当前会话：有作答则完成并同步，否则删除
    pub fn abandon_session(&mut self) -> EngineResult<Option<AbandonOutcome>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        if !active.session.is_active() {
            return Ok(None);
        }

        let outcome = match self.sessions.abandon(&active.session) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.active = Some(active);
                return Err(e.into());
            }
        };
        if outcome == AbandonOutcome::Completed {
            self.scheduler.notify(&active.session.user_id);
        }
        Ok(Some(outcome))
    }

    // ==================== 同步 ====================

    /// 立即同步 (管理操作)
    pub async fn sync_now(&self) -> EngineResult<SyncReport> {
        let user_id = &self.profile()?.user_id;
        Ok(self.scheduler.sync_now(user_id).await?)
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    // ==================== 快照 ====================

    pub fn current_question(&self) -> Option<&Question> {
        self.active
            .as_ref()
            .and_then(|active| active.current.as_ref())
            .and_then(|selection| selection.question.as_ref())
    }

    pub fn current_rationale(&self) -> Option<&str> {
        self.active
            .as_ref()
            .and_then(|active| active.current.as_ref())
            .map(|selection| selection.rationale.as_str())
    }

    /// 没有进行中的会话时也返回 true
    pub fn is_session_complete(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.session.is_active())
            .unwrap_or(true)
    }

    pub fn session(&self) -> Option<&AssessmentSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    pub fn mastery(&self) -> Option<&MasteryMap> {
        self.profile.as_ref().map(|profile| &profile.mastery)
    }

    pub fn stats(&self) -> Option<&StudentStats> {
        self.profile.as_ref().map(|profile| profile.ledger.stats())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|profile| profile.user_id.as_str())
    }

    // ==================== 辅助方法 ====================

    fn profile(&self) -> EngineResult<&Profile> {
        self.profile.as_ref().ok_or(EngineError::NotLoaded)
    }

    fn drill_progress(&self, bundle_id: &str) -> zhangwo_algo::DrillProgress {
        self.profile
            .as_ref()
            .and_then(|profile| profile.ledger.stats().drill.get(bundle_id).cloned())
            .unwrap_or_default()
    }
}
