//! Adaptive Exercise Selection
//!
//! Picks the next exercise from the learner's current mastery estimate.
//!
//! Algorithm:
//! 1. Eligible atoms: LIVE, inside an assigned chapter (dynamic bundles skip
//!    this gate) and with every prerequisite at or above the mastery threshold
//! 2. Priority atom: the eligible atom with the lowest mastery; ties go to the
//!    atom encountered first in the curriculum
//! 3. Static bundles draw a random question of the priority atom that is not
//!    in the recent history, falling back to any eligible atom
//! 4. Dynamic bundles follow the stage/review policy in [`drill`]
//!
//! Randomization is deliberate: pure lowest-mastery selection would make
//! sessions predictable and narrow.

pub mod drill;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::types::{
    mastery_of, Atom, DrillProgress, MasteryMap, Question, RecentHistory, Selection,
    SubjectBundle, DEFAULT_INITIAL_MASTERY, MASTERY_THRESHOLD,
};

// ==================== Constants ====================

/// Probability of drilling an already-passed stage
pub const DEFAULT_REVIEW_PROBABILITY: f64 = 0.30;

/// Rolling accuracy the current stage must exceed before advancing
pub const DEFAULT_ADVANCE_ACCURACY: f64 = 0.90;

/// Number of answers in the rolling stage accuracy window
pub const DEFAULT_ACCURACY_WINDOW: usize = 10;

// ==================== Data Structures ====================

/// Tunable selection parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionParams {
    /// Prerequisite gate
    pub mastery_threshold: f64,
    /// Prior for never-practiced skills
    pub initial_mastery: f64,
    /// Dynamic bundles: share of review picks
    pub review_probability: f64,
    /// Dynamic bundles: accuracy needed to leave a stage
    pub advance_accuracy: f64,
    /// Dynamic bundles: size of the accuracy window
    pub accuracy_window: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            mastery_threshold: MASTERY_THRESHOLD,
            initial_mastery: DEFAULT_INITIAL_MASTERY,
            review_probability: DEFAULT_REVIEW_PROBABILITY,
            advance_accuracy: DEFAULT_ADVANCE_ACCURACY,
            accuracy_window: DEFAULT_ACCURACY_WINDOW,
        }
    }
}

/// Everything a single selection call looks at
pub struct SelectionContext<'a> {
    pub bundle: &'a SubjectBundle,
    pub mastery: &'a MasteryMap,
    pub recent: &'a RecentHistory,
    /// Chapter ids the learner is assigned; `None` or empty means all
    pub assigned_chapters: Option<&'a [String]>,
    /// Drill state, advanced in place for dynamic bundles
    pub drill: Option<&'a mut DrillProgress>,
}

impl<'a> SelectionContext<'a> {
    pub fn new(bundle: &'a SubjectBundle, mastery: &'a MasteryMap, recent: &'a RecentHistory) -> Self {
        Self {
            bundle,
            mastery,
            recent,
            assigned_chapters: None,
            drill: None,
        }
    }

    pub fn with_assigned_chapters(mut self, chapters: &'a [String]) -> Self {
        self.assigned_chapters = Some(chapters);
        self
    }

    pub fn with_drill(mut self, drill: &'a mut DrillProgress) -> Self {
        self.drill = Some(drill);
        self
    }
}

/// Selection engine
///
/// Holds only the parameters and a seedable RNG; all learner state is passed
/// in through [`SelectionContext`].
pub struct SelectionEngine {
    params: SelectionParams,
    rng: ChaCha8Rng,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionEngine {
    /// Create an engine with default parameters and a time-based seed
    pub fn new() -> Self {
        Self::with_params(SelectionParams::default(), None)
    }

    /// Create an engine with a fixed seed (for testing)
    pub fn with_seed(seed: u64) -> Self {
        Self::with_params(SelectionParams::default(), Some(seed))
    }

    pub fn with_params(params: SelectionParams, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(42)
        });

        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &SelectionParams {
        &self.params
    }

    // ==================== Eligibility ====================

    /// Atoms that may be practiced right now, in encounter order
    pub fn eligible_atoms<'b>(
        &self,
        bundle: &'b SubjectBundle,
        mastery: &MasteryMap,
        assigned_chapters: Option<&[String]>,
    ) -> Vec<&'b Atom> {
        let gate_chapters = !bundle.is_dynamic
            && assigned_chapters.map(|chapters| !chapters.is_empty()).unwrap_or(false);

        bundle
            .atoms()
            .filter(|(chapter_id, _)| {
                !gate_chapters
                    || assigned_chapters
                        .map(|chapters| chapters.iter().any(|c| c == chapter_id))
                        .unwrap_or(true)
            })
            .map(|(_, atom)| atom)
            .filter(|atom| atom.is_live())
            .filter(|atom| {
                atom.prerequisites_met(
                    mastery,
                    self.params.initial_mastery,
                    self.params.mastery_threshold,
                )
            })
            .collect()
    }

    /// Eligible atom with the lowest mastery; the first one wins ties
    pub fn priority_atom<'b>(&self, eligible: &[&'b Atom], mastery: &MasteryMap) -> Option<&'b Atom> {
        let mut best: Option<(&'b Atom, f64)> = None;
        for &atom in eligible {
            let value = mastery_of(mastery, &atom.id, self.params.initial_mastery);
            match best {
                Some((_, lowest)) if value >= lowest => {}
                _ => best = Some((atom, value)),
            }
        }
        best.map(|(atom, _)| atom)
    }

    // ==================== Selection ====================

    /// Pick the next exercise
    pub fn select_next(&mut self, ctx: SelectionContext<'_>) -> Selection {
        let SelectionContext {
            bundle,
            mastery,
            recent,
            assigned_chapters,
            drill,
        } = ctx;

        let eligible = self.eligible_atoms(bundle, mastery, assigned_chapters);
        if eligible.is_empty() {
            return Selection::exhausted(format!(
                "No unlocked atoms in '{}': every live atom is outside the assigned chapters or waiting on a prerequisite",
                bundle.title
            ));
        }

        let Some(priority) = self.priority_atom(&eligible, mastery) else {
            return Selection::exhausted("No priority atom");
        };

        if bundle.is_dynamic {
            let mut scratch = DrillProgress::default();
            let drill = drill.unwrap_or(&mut scratch);
            return self.select_dynamic(bundle, mastery, recent, &eligible, priority, drill);
        }

        self.select_static(bundle, mastery, recent, &eligible, priority)
    }

    fn select_static(
        &mut self,
        bundle: &SubjectBundle,
        mastery: &MasteryMap,
        recent: &RecentHistory,
        eligible: &[&Atom],
        priority: &Atom,
    ) -> Selection {
        let priority_mastery = mastery_of(mastery, &priority.id, self.params.initial_mastery);

        let primary: Vec<&Question> = bundle
            .questions_for_atom(&priority.id)
            .filter(|q| !recent.contains(&q.id))
            .collect();

        if let Some(&question) = primary.choose(&mut self.rng) {
            return Selection {
                question: Some(question.clone()),
                rationale: format!(
                    "Focusing on '{}' (mastery {:.2}), the weakest of {} unlocked atoms",
                    priority.title,
                    priority_mastery,
                    eligible.len()
                ),
                target: Some(question.fact_id.clone().unwrap_or_else(|| priority.id.clone())),
                stage: None,
                is_review: false,
            };
        }

        let fallback: Vec<&Question> = bundle
            .questions
            .iter()
            .filter(|q| eligible.iter().any(|atom| atom.id == q.atom_id))
            .filter(|q| !recent.contains(&q.id))
            .collect();

        match fallback.choose(&mut self.rng) {
            Some(&question) => {
                let title = bundle
                    .find_atom(&question.atom_id)
                    .map(|atom| atom.title.as_str())
                    .unwrap_or(question.atom_id.as_str());
                Selection {
                    question: Some(question.clone()),
                    rationale: format!(
                        "No fresh questions left for '{}'; practicing '{}' instead",
                        priority.title, title
                    ),
                    target: Some(
                        question
                            .fact_id
                            .clone()
                            .unwrap_or_else(|| question.atom_id.clone()),
                    ),
                    stage: None,
                    is_review: false,
                }
            }
            None => Selection::exhausted(format!(
                "Every question for the {} unlocked atoms was answered recently",
                eligible.len()
            )),
        }
    }
}

// ==================== Unit Tests ====================
