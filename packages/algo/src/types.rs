//! Common Types and Constants
//!
//! Curriculum, question and mastery structures shared by the BKT model,
//! the selection engine and the drill generator.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

// ==================== Constants ====================

/// Lower bound of any mastery estimate
pub const MIN_MASTERY: f64 = 0.01;

/// Upper bound of any mastery estimate
pub const MAX_MASTERY: f64 = 0.99;

/// Mastery at or above which a skill counts as mastered (prerequisite gate)
pub const MASTERY_THRESHOLD: f64 = 0.85;

/// Prior used for skills that have never been practiced
pub const DEFAULT_INITIAL_MASTERY: f64 = 0.25;

/// Number of answered ids kept to avoid immediate repeats
pub const RECENT_HISTORY_CAPACITY: usize = 10;

// ==================== Mastery ====================

/// Skill key (atom id or fact id) to probability of mastery
pub type MasteryMap = HashMap<String, f64>;

/// Read a skill's mastery, falling back to the given prior
pub fn mastery_of(map: &MasteryMap, key: &str, initial: f64) -> f64 {
    map.get(key).copied().unwrap_or(initial)
}

// ==================== Curriculum ====================

/// Lifecycle status of an atom
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomStatus {
    Draft,
    Live,
}

/// Arithmetic operation of a procedural drill
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillOperation {
    Add,
    Sub,
    Mul,
    Div,
}

impl DrillOperation {
    pub fn symbol(&self) -> &'static str {
        match self {
            DrillOperation::Add => "+",
            DrillOperation::Sub => "−",
            DrillOperation::Mul => "×",
            DrillOperation::Div => "÷",
        }
    }
}

/// Fact family drilled by a dynamic atom, e.g. the 7 times table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrillSpec {
    pub operation: DrillOperation,
    /// Fixed operand of every fact in the family
    pub base: i64,
    pub min_operand: i64,
    pub max_operand: i64,
}

impl DrillSpec {
    /// Fact id for one operand of this family
    pub fn fact_id(atom_id: &str, operand: i64) -> String {
        format!("{atom_id}#{operand}")
    }

    /// All fact ids of this family, in operand order
    pub fn fact_ids(&self, atom_id: &str) -> Vec<String> {
        (self.min_operand..=self.max_operand)
            .map(|operand| Self::fact_id(atom_id, operand))
            .collect()
    }
}

/// Parse the operand back out of a fact id produced by [`DrillSpec::fact_id`]
pub fn parse_fact_operand(fact_id: &str) -> Option<i64> {
    fact_id.rsplit_once('#')?.1.parse().ok()
}

/// Exercise template identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateId {
    Mcq,
    Numeric,
    Sorting,
    Matching,
    TwoTier,
    MathTable,
    Branching,
    NumberLine,
}

/// Smallest unit of curriculum knowledge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub title: String,
    /// Atom ids that must be mastered first, in display order
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub status: AtomStatus,
    #[serde(default)]
    pub templates: Vec<TemplateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drill: Option<DrillSpec>,
}

impl Atom {
    pub fn is_live(&self) -> bool {
        self.status == AtomStatus::Live
    }

    /// Fact ids tracked below this atom (empty for non-drill atoms)
    pub fn facts(&self) -> Vec<String> {
        self.drill
            .as_ref()
            .map(|spec| spec.fact_ids(&self.id))
            .unwrap_or_default()
    }

    /// Whether every prerequisite is at or above `threshold`
    pub fn prerequisites_met(&self, mastery: &MasteryMap, initial: f64, threshold: f64) -> bool {
        self.prerequisites
            .iter()
            .all(|prereq| mastery_of(mastery, prereq, initial) >= threshold)
    }
}

/// Ordered group of atoms
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub atoms: Vec<Atom>,
}

/// Versioned curriculum + question pool for one subject
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectBundle {
    pub id: String,
    pub title: String,
    pub curriculum: Vec<Chapter>,
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Semantic version string
    pub version: String,
    /// RFC 3339 timestamp of the last content change
    pub last_updated: String,
    /// Questions are generated procedurally instead of drawn from the pool
    #[serde(default)]
    pub is_dynamic: bool,
}

impl SubjectBundle {
    /// Atoms in encounter order, paired with their chapter id
    pub fn atoms(&self) -> impl Iterator<Item = (&str, &Atom)> {
        self.curriculum
            .iter()
            .flat_map(|chapter| chapter.atoms.iter().map(move |atom| (chapter.id.as_str(), atom)))
    }

    pub fn find_atom(&self, atom_id: &str) -> Option<&Atom> {
        self.atoms().map(|(_, atom)| atom).find(|atom| atom.id == atom_id)
    }

    pub fn questions_for_atom<'a>(&'a self, atom_id: &'a str) -> impl Iterator<Item = &'a Question> {
        self.questions.iter().filter(move |q| q.atom_id == atom_id)
    }
}

// ==================== Questions ====================

/// One step of a branching scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchStep {
    pub prompt: String,
    pub options: Vec<String>,
    pub answer_index: usize,
}

/// Template-specific question body, keyed by template id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "templateId", content = "data", rename_all = "kebab-case")]
pub enum QuestionPayload {
    Mcq {
        prompt: String,
        options: Vec<String>,
        answer_index: usize,
    },
    Numeric {
        prompt: String,
        answer: f64,
        #[serde(default)]
        tolerance: f64,
    },
    Sorting {
        prompt: String,
        items: Vec<String>,
        correct_order: Vec<usize>,
    },
    Matching {
        prompt: String,
        left: Vec<String>,
        right: Vec<String>,
        /// (left index, right index)
        pairs: Vec<(usize, usize)>,
    },
    TwoTier {
        prompt: String,
        options: Vec<String>,
        answer_index: usize,
        reasons: Vec<String>,
        reason_index: usize,
    },
    MathTable {
        prompt: String,
        headers: Vec<String>,
        /// `None` cells are blanks the learner fills in
        rows: Vec<Vec<Option<f64>>>,
        answers: Vec<f64>,
    },
    Branching {
        prompt: String,
        steps: Vec<BranchStep>,
    },
    NumberLine {
        prompt: String,
        min: f64,
        max: f64,
        target: f64,
        #[serde(default)]
        tolerance: f64,
    },
}

impl QuestionPayload {
    pub fn template_id(&self) -> TemplateId {
        match self {
            QuestionPayload::Mcq { .. } => TemplateId::Mcq,
            QuestionPayload::Numeric { .. } => TemplateId::Numeric,
            QuestionPayload::Sorting { .. } => TemplateId::Sorting,
            QuestionPayload::Matching { .. } => TemplateId::Matching,
            QuestionPayload::TwoTier { .. } => TemplateId::TwoTier,
            QuestionPayload::MathTable { .. } => TemplateId::MathTable,
            QuestionPayload::Branching { .. } => TemplateId::Branching,
            QuestionPayload::NumberLine { .. } => TemplateId::NumberLine,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            QuestionPayload::Mcq { prompt, .. }
            | QuestionPayload::Numeric { prompt, .. }
            | QuestionPayload::Sorting { prompt, .. }
            | QuestionPayload::Matching { prompt, .. }
            | QuestionPayload::TwoTier { prompt, .. }
            | QuestionPayload::MathTable { prompt, .. }
            | QuestionPayload::Branching { prompt, .. }
            | QuestionPayload::NumberLine { prompt, .. } => prompt,
        }
    }
}

/// Question envelope; selection and session code never look inside `payload`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub atom_id: String,
    pub version: String,
    /// Finer-grained skill key, set for drill facts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_id: Option<String>,
    pub payload: QuestionPayload,
}

impl Question {
    pub fn template_id(&self) -> TemplateId {
        self.payload.template_id()
    }
}

// ==================== Recent History ====================

/// Bounded queue of recently answered question ids
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentHistory {
    ids: VecDeque<String>,
    capacity: usize,
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::with_capacity(RECENT_HISTORY_CAPACITY)
    }
}

impl RecentHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push an id, evicting the oldest once full
    pub fn push(&mut self, id: impl Into<String>) {
        self.ids.push_back(id.into());
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|recent| recent == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

// ==================== Drill Progress ====================

/// Per-user state of dynamic drills
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DrillProgress {
    /// Index of the current stage among the bundle's live atoms
    #[serde(default)]
    pub current_stage: usize,
    /// Rolling outcomes of the current stage, oldest first
    #[serde(default)]
    pub stage_results: VecDeque<bool>,
    /// Fact id to current run of correct answers
    #[serde(default)]
    pub fact_streaks: HashMap<String, u32>,
}

impl DrillProgress {
    /// Record an answer; only non-review answers on the current stage count
    /// toward the stage's rolling accuracy
    pub fn record_answer(
        &mut self,
        stage: Option<usize>,
        fact_id: Option<&str>,
        is_correct: bool,
        window: usize,
    ) {
        if stage == Some(self.current_stage) {
            self.stage_results.push_back(is_correct);
            while self.stage_results.len() > window.max(1) {
                self.stage_results.pop_front();
            }
        }

        if let Some(fact) = fact_id {
            let streak = self.fact_streaks.entry(fact.to_string()).or_insert(0);
            if is_correct {
                *streak += 1;
            } else {
                *streak = 0;
            }
        }
    }

    /// Accuracy over the rolling window, `None` while empty
    pub fn rolling_accuracy(&self) -> Option<f64> {
        if self.stage_results.is_empty() {
            return None;
        }
        let correct = self.stage_results.iter().filter(|&&ok| ok).count();
        Some(correct as f64 / self.stage_results.len() as f64)
    }

    pub fn streak_for(&self, id: &str) -> u32 {
        self.fact_streaks.get(id).copied().unwrap_or(0)
    }

    /// Move to the next stage and start a fresh accuracy window
    pub fn advance(&mut self) {
        self.current_stage += 1;
        self.stage_results.clear();
    }
}

// ==================== Selection Output ====================

/// Result of one selection call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// `None` means the session is exhausted (not an error)
    pub question: Option<Question>,
    /// Human-readable explanation of the choice
    pub rationale: String,
    /// Skill key the question targets
    pub target: Option<String>,
    /// Drill stage the question belongs to (dynamic bundles)
    pub stage: Option<usize>,
    /// Question drills an already-passed stage
    pub is_review: bool,
}

impl Selection {
    pub fn exhausted(rationale: impl Into<String>) -> Self {
        Self {
            question: None,
            rationale: rationale.into(),
            target: None,
            stage: None,
            is_review: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.question.is_none()
    }
}

// ==================== Unit Tests ====================
