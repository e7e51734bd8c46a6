//! Dynamic Drill Policy
//!
//! Stages are the bundle's live atoms in curriculum order. Each selection:
//! - with probability `review_probability` revisits a random passed stage
//!   (a stage below the current one) and drills a random fresh fact in it
//! - otherwise stays on the current stage, first advancing when the stage's
//!   rolling accuracy exceeds `advance_accuracy` over a full window
//!
//! Inside the chosen stage the weakest fact not answered recently is drilled.
//! A stage that declares no facts targets the priority atom instead.

use rand::prelude::*;

use super::SelectionEngine;
use crate::generator;
use crate::types::{mastery_of, Atom, DrillProgress, MasteryMap, RecentHistory, Selection, SubjectBundle};

/// Target chosen by the drill policy, before generation
struct DrillPick<'b> {
    atom: &'b Atom,
    target: String,
    stage: usize,
    is_review: bool,
    rationale: String,
}

impl SelectionEngine {
    pub(crate) fn select_dynamic(
        &mut self,
        bundle: &SubjectBundle,
        mastery: &MasteryMap,
        recent: &RecentHistory,
        eligible: &[&Atom],
        priority: &Atom,
        drill: &mut DrillProgress,
    ) -> Selection {
        let stages: Vec<&Atom> = bundle
            .atoms()
            .map(|(_, atom)| atom)
            .filter(|atom| atom.is_live())
            .collect();
        if stages.is_empty() {
            return Selection::exhausted(format!("'{}' has no live stages", bundle.title));
        }

        if drill.current_stage >= stages.len() {
            drill.current_stage = stages.len() - 1;
        }

        let advanced_from = self.maybe_advance(drill, &stages);

        let pick = match self.pick_review(&stages, eligible, recent, drill.current_stage) {
            Some(pick) => pick,
            None => self.pick_current(&stages, eligible, priority, mastery, recent, drill, advanced_from),
        };

        let streak = drill.streak_for(&pick.target);
        self.generate_for(bundle, mastery, recent, eligible, pick, streak)
    }

    /// Advance past the current stage when its window is full and accurate enough
    fn maybe_advance(&self, drill: &mut DrillProgress, stages: &[&Atom]) -> Option<(String, f64)> {
        let window = self.params.accuracy_window.max(1);
        if drill.stage_results.len() < window || drill.current_stage + 1 >= stages.len() {
            return None;
        }

        let accuracy = drill.rolling_accuracy()?;
        if accuracy <= self.params.advance_accuracy {
            return None;
        }

        let title = stages[drill.current_stage].title.clone();
        drill.advance();
        Some((title, accuracy))
    }

    /// Random passed stage and a random fact in it that was not answered recently.
    /// Stages whose facts are all recent are skipped; with none left the
    /// current stage is drilled instead.
    fn pick_review<'b>(
        &mut self,
        stages: &[&'b Atom],
        eligible: &[&Atom],
        recent: &RecentHistory,
        current_stage: usize,
    ) -> Option<DrillPick<'b>> {
        let review_pool: Vec<(usize, &'b Atom, Vec<String>)> = stages[..current_stage]
            .iter()
            .enumerate()
            .filter(|(_, atom)| eligible.iter().any(|e| e.id == atom.id))
            .filter_map(|(idx, atom)| {
                let mut facts = atom.facts();
                if facts.is_empty() {
                    facts.push(atom.id.clone());
                }
                facts.retain(|f| !recent.contains(f));
                (!facts.is_empty()).then_some((idx, *atom, facts))
            })
            .collect();
        if review_pool.is_empty() {
            return None;
        }

        let review_probability = self.params.review_probability.clamp(0.0, 1.0);
        if !self.rng.gen_bool(review_probability) {
            return None;
        }

        let &(stage, atom, ref fresh) = review_pool.choose(&mut self.rng)?;
        let target = fresh.choose(&mut self.rng)?.clone();

        Some(DrillPick {
            atom,
            rationale: format!("Review: revisiting passed stage '{}' with {}", atom.title, target),
            target,
            stage,
            is_review: true,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn pick_current<'b>(
        &self,
        stages: &[&'b Atom],
        eligible: &[&Atom],
        priority: &'b Atom,
        mastery: &MasteryMap,
        recent: &RecentHistory,
        drill: &DrillProgress,
        advanced_from: Option<(String, f64)>,
    ) -> DrillPick<'b> {
        // The current stage, or the priority atom while the stage is locked
        let current = stages[drill.current_stage];
        let (stage, stage_atom) = if eligible.iter().any(|e| e.id == current.id) {
            (drill.current_stage, current)
        } else {
            let idx = stages
                .iter()
                .position(|atom| atom.id == priority.id)
                .unwrap_or(drill.current_stage);
            (idx, priority)
        };

        let facts = stage_atom.facts();
        let (atom, target) = if facts.is_empty() {
            (priority, priority.id.clone())
        } else {
            let fresh: Vec<&String> = facts.iter().filter(|f| !recent.contains(f)).collect();
            let candidates = if fresh.is_empty() {
                facts.iter().collect()
            } else {
                fresh
            };
            (stage_atom, self.weakest(&candidates, mastery))
        };

        let mut rationale = format!(
            "Stage {}/{} '{}': drilling {} (mastery {:.2})",
            stage + 1,
            stages.len(),
            stage_atom.title,
            target,
            mastery_of(mastery, &target, self.params.initial_mastery)
        );
        if let Some((title, accuracy)) = advanced_from {
            rationale.push_str(&format!(
                "; advanced after {:.0}% accuracy on '{}'",
                accuracy * 100.0,
                title
            ));
        }

        DrillPick {
            atom,
            target,
            stage,
            is_review: false,
            rationale,
        }
    }

    /// Lowest-mastery candidate; the first one wins ties
    fn weakest(&self, candidates: &[&String], mastery: &MasteryMap) -> String {
        let mut best: Option<(&String, f64)> = None;
        for &fact in candidates {
            let value = mastery_of(mastery, fact, self.params.initial_mastery);
            match best {
                Some((_, lowest)) if value >= lowest => {}
                _ => best = Some((fact, value)),
            }
        }
        best.map(|(fact, _)| fact.clone()).unwrap_or_default()
    }

    fn generate_for(
        &mut self,
        bundle: &SubjectBundle,
        mastery: &MasteryMap,
        recent: &RecentHistory,
        eligible: &[&Atom],
        pick: DrillPick<'_>,
        streak: u32,
    ) -> Selection {
        let target_mastery = mastery_of(mastery, &pick.target, self.params.initial_mastery);

        match generator::generate(
            pick.atom,
            &pick.target,
            target_mastery,
            streak,
            &bundle.version,
            &mut self.rng,
        ) {
            Some(question) => Selection {
                target: question.fact_id.clone().or(Some(pick.target)),
                question: Some(question),
                rationale: pick.rationale,
                stage: Some(pick.stage),
                is_review: pick.is_review,
            },
            // Atom without a drill spec: fall back to its fixed pool
            None => self.select_static(bundle, mastery, recent, eligible, pick.atom),
        }
    }
}

// ==================== Unit Tests ====================
