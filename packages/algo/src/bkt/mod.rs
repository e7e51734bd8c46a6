//! Bayesian Knowledge Tracing - Native Rust Implementation
//!
//! Core theory:
//! - A skill is either known (L) or not known; the model tracks P(L)
//! - Each observed answer is evidence about L, filtered through two noise
//!   terms: guessing a right answer without knowing, slipping on a known skill
//! - After the evidence update the learner may acquire the skill during the
//!   interaction itself (transit)
//!
//! Mathematical formulas:
//! - Correct:   P(L|c) = p(1-S) / [p(1-S) + (1-p)G]
//! - Incorrect: P(L|w) = pS / [pS + (1-p)(1-G)]
//! - Posterior: P(L') = P(L|a) + (1 - P(L|a))T
//!   - G: guess probability
//!   - S: slip probability
//!   - T: transit probability
//!
//! The posterior is clamped to [0.01, 0.99]: the model never claims certainty
//! in either direction.
//!
//! References:
//! - Corbett, A. T., & Anderson, J. R. (1994). Knowledge tracing: Modeling the
//!   acquisition of procedural knowledge.

use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize_probability;
use crate::types::{mastery_of, MasteryMap, MAX_MASTERY, MIN_MASTERY};

// ==================== Constants ====================

/// Default guess probability (correct while not knowing)
pub const DEFAULT_GUESS: f64 = 0.20;

/// Default slip probability (incorrect while knowing)
pub const DEFAULT_SLIP: f64 = 0.10;

/// Default transit probability (learning during the interaction)
pub const DEFAULT_TRANSIT: f64 = 0.15;

// ==================== Data Structures ====================

/// BKT parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    /// Guess probability G
    pub guess: f64,
    /// Slip probability S
    pub slip: f64,
    /// Transit probability T
    pub transit: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            guess: DEFAULT_GUESS,
            slip: DEFAULT_SLIP,
            transit: DEFAULT_TRANSIT,
        }
    }
}

/// Before/after pair for one skill key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasteryUpdate {
    pub skill_key: String,
    pub before: f64,
    pub after: f64,
}

impl MasteryUpdate {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

impl BktParams {
    /// Evidence step only: P(L | observation)
    pub fn posterior_given_observation(&self, prior: f64, is_correct: bool) -> f64 {
        let p = sanitize_probability(prior);

        let (known, unknown) = if is_correct {
            (p * (1.0 - self.slip), (1.0 - p) * self.guess)
        } else {
            (p * self.slip, (1.0 - p) * (1.0 - self.guess))
        };

        let total = known + unknown;
        if total <= 0.0 || !total.is_finite() {
            return p;
        }
        known / total
    }

    /// Full BKT step: evidence update, then transit, then clamp
    pub fn update(&self, prior: f64, is_correct: bool) -> f64 {
        let given = self.posterior_given_observation(prior, is_correct);
        let posterior = given + (1.0 - given) * self.transit;
        posterior.clamp(MIN_MASTERY, MAX_MASTERY)
    }

    /// Update one skill inside a mastery map
    ///
    /// Unknown keys start at `initial`. Returns the before/after pair.
    pub fn apply(
        &self,
        mastery: &mut MasteryMap,
        skill_key: &str,
        is_correct: bool,
        initial: f64,
    ) -> MasteryUpdate {
        let before = sanitize_probability(mastery_of(mastery, skill_key, initial));
        let after = self.update(before, is_correct);
        mastery.insert(skill_key.to_string(), after);

        MasteryUpdate {
            skill_key: skill_key.to_string(),
            before,
            after,
        }
    }
}

/// BKT update with the default parameters
pub fn update(prior: f64, is_correct: bool) -> f64 {
    BktParams::default().update(prior, is_correct)
}

// ==================== Unit Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_prior_correct_answer() {
        let posterior = update(0.25, true);
        assert!((posterior - 0.66).abs() < 0.01, "got {}", posterior);
    }

    #[test]
    fn test_low_prior_incorrect_answer() {
        let posterior = update(0.25, false);
        assert!((posterior - 0.184).abs() < 0.001, "got {}", posterior);
    }

    #[test]
    fn test_high_prior_slip_does_not_crash_estimate() {
        let posterior = update(0.95, false);
        assert!((posterior - 0.748).abs() < 0.001, "got {}", posterior);
    }

    #[test]
    fn test_result_is_clamped() {
        assert_eq!(update(0.99, true), MAX_MASTERY);
        assert!(update(0.01, false) >= MIN_MASTERY);
        assert!(update(0.0, false) >= MIN_MASTERY);
        assert!(update(1.0, true) <= MAX_MASTERY);
    }

    #[test]
    fn test_non_finite_prior_is_sanitized() {
        let posterior = update(f64::NAN, true);
        assert!(posterior.is_finite());
        assert!((MIN_MASTERY..=MAX_MASTERY).contains(&posterior));
    }

    #[test]
    fn test_repeated_correct_answers_converge() {
        let mut p = 0.05;
        for _ in 0..50 {
            let next = update(p, true);
            assert!(next >= p);
            assert!(next < 1.0);
            p = next;
        }
        assert_eq!(p, MAX_MASTERY);
    }

    #[test]
    fn test_apply_uses_initial_prior_for_unknown_key() {
        let params = BktParams::default();
        let mut mastery = MasteryMap::new();

        let result = params.apply(&mut mastery, "fractions", true, 0.25);
        assert_eq!(result.before, 0.25);
        assert!((result.after - 0.66).abs() < 0.01);
        assert_eq!(mastery.get("fractions"), Some(&result.after));
        assert!(result.delta() > 0.0);
    }

    #[test]
    fn test_custom_params() {
        let params = BktParams {
            guess: 0.3,
            slip: 0.05,
            transit: 0.0,
        };
        // No transit: posterior equals the evidence step
        let p = params.update(0.5, true);
        let expected = 0.5 * 0.95 / (0.5 * 0.95 + 0.5 * 0.3);
        assert!((p - expected).abs() < 1e-12);
    }
}
