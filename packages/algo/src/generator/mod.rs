//! Procedural Drill Generation
//!
//! Builds arithmetic fact questions for dynamic bundles. The format depends
//! on how well the learner knows the fact:
//! - low mastery and a short streak: multiple choice with near-miss distractors
//! - otherwise: free numeric entry
//! - a streak at or past [`STREAK_SCALE_THRESHOLD`]: one operand scaled by 10

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{parse_fact_operand, Atom, DrillOperation, DrillSpec, Question, QuestionPayload};

// ==================== Constants ====================

/// Correct streak after which operands are scaled up
pub const STREAK_SCALE_THRESHOLD: u32 = 5;

/// Streak at which multiple choice gives way to numeric entry
pub const NUMERIC_ENTRY_STREAK: u32 = 2;

/// Mastery at which multiple choice gives way to numeric entry
pub const NUMERIC_ENTRY_MASTERY: f64 = 0.5;

/// Number of options in a generated multiple-choice question
const MCQ_OPTIONS: usize = 4;

/// Operand scale applied past the streak threshold
const SCALE_FACTOR: i64 = 10;

// ==================== Generation ====================

/// Operands and answer of one arithmetic fact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FactOperands {
    pub left: i64,
    pub right: i64,
    pub answer: i64,
}

/// Compute the operands of `spec` applied to `operand`
pub fn fact_operands(spec: &DrillSpec, operand: i64) -> FactOperands {
    let base = spec.base;
    match spec.operation {
        DrillOperation::Add => FactOperands {
            left: base,
            right: operand,
            answer: base + operand,
        },
        DrillOperation::Sub => FactOperands {
            left: base + operand,
            right: base,
            answer: operand,
        },
        DrillOperation::Mul => FactOperands {
            left: base,
            right: operand,
            answer: base * operand,
        },
        DrillOperation::Div => FactOperands {
            left: base * operand,
            right: base,
            answer: operand,
        },
    }
}

/// Generate a question for `target`
///
/// `target` is either a fact id (`atom#operand`) or the atom id itself, in
/// which case a random operand of the family is drilled. Returns `None` when
/// the atom has no drill spec.
pub fn generate<R: Rng + ?Sized>(
    atom: &Atom,
    target: &str,
    mastery: f64,
    streak: u32,
    version: &str,
    rng: &mut R,
) -> Option<Question> {
    let spec = atom.drill.as_ref()?;

    let operand = match parse_fact_operand(target) {
        Some(operand) if target != atom.id => operand,
        _ => {
            let (lo, hi) = ordered_range(spec);
            rng.gen_range(lo..=hi)
        }
    };
    let fact_id = DrillSpec::fact_id(&atom.id, operand);

    let scaled = streak >= STREAK_SCALE_THRESHOLD;
    let effective = if scaled { operand * SCALE_FACTOR } else { operand };
    let ops = fact_operands(spec, effective);
    let prompt = format!("{} {} {} = ?", ops.left, spec.operation.symbol(), ops.right);

    let payload = if mastery < NUMERIC_ENTRY_MASTERY && streak < NUMERIC_ENTRY_STREAK {
        let (options, answer_index) = multiple_choice(ops.answer, spec.base, rng);
        QuestionPayload::Mcq {
            prompt,
            options,
            answer_index,
        }
    } else {
        QuestionPayload::Numeric {
            prompt,
            answer: ops.answer as f64,
            tolerance: 0.0,
        }
    };

    Some(Question {
        id: fact_id.clone(),
        atom_id: atom.id.clone(),
        version: version.to_string(),
        fact_id: Some(fact_id),
        payload,
    })
}

fn ordered_range(spec: &DrillSpec) -> (i64, i64) {
    if spec.min_operand <= spec.max_operand {
        (spec.min_operand, spec.max_operand)
    } else {
        (spec.max_operand, spec.min_operand)
    }
}

/// Shuffle the answer among near-miss distractors
fn multiple_choice<R: Rng + ?Sized>(answer: i64, base: i64, rng: &mut R) -> (Vec<String>, usize) {
    let step = base.abs().max(1);
    let candidates = [
        answer + 1,
        answer - 1,
        answer + step,
        answer - step,
        answer + 2,
        answer + 2 * step,
        answer + 10,
    ];

    let mut values = vec![answer];
    for candidate in candidates {
        if values.len() == MCQ_OPTIONS {
            break;
        }
        if candidate >= 0 && !values.contains(&candidate) {
            values.push(candidate);
        }
    }
    values.shuffle(rng);

    let answer_index = values.iter().position(|&v| v == answer).unwrap_or(0);
    (values.iter().map(i64::to_string).collect(), answer_index)
}

// ==================== Unit Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomStatus;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn times_table(base: i64) -> Atom {
        Atom {
            id: format!("mul-{base}"),
            title: format!("{base} times table"),
            prerequisites: vec![],
            status: AtomStatus::Live,
            templates: vec![],
            drill: Some(DrillSpec {
                operation: DrillOperation::Mul,
                base,
                min_operand: 1,
                max_operand: 10,
            }),
        }
    }

    #[test]
    fn test_fact_operands_for_each_operation() {
        let mut spec = DrillSpec {
            operation: DrillOperation::Add,
            base: 7,
            min_operand: 1,
            max_operand: 10,
        };
        assert_eq!(fact_operands(&spec, 3).answer, 10);
        spec.operation = DrillOperation::Sub;
        assert_eq!(fact_operands(&spec, 3), FactOperands { left: 10, right: 7, answer: 3 });
        spec.operation = DrillOperation::Mul;
        assert_eq!(fact_operands(&spec, 3).answer, 21);
        spec.operation = DrillOperation::Div;
        assert_eq!(fact_operands(&spec, 3), FactOperands { left: 21, right: 7, answer: 3 });
    }

    #[test]
    fn test_low_mastery_yields_multiple_choice() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let atom = times_table(7);
        let q = generate(&atom, "mul-7#8", 0.2, 0, "1.0.0", &mut rng).unwrap();

        assert_eq!(q.id, "mul-7#8");
        assert_eq!(q.fact_id.as_deref(), Some("mul-7#8"));
        match q.payload {
            QuestionPayload::Mcq { prompt, options, answer_index } => {
                assert_eq!(prompt, "7 × 8 = ?");
                assert_eq!(options.len(), 4);
                assert_eq!(options[answer_index], "56");
            }
            other => panic!("expected mcq, got {:?}", other),
        }
    }

    #[test]
    fn test_streak_switches_to_numeric_and_scales() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let atom = times_table(7);

        let q = generate(&atom, "mul-7#8", 0.6, 2, "1.0.0", &mut rng).unwrap();
        assert!(matches!(q.payload, QuestionPayload::Numeric { answer, .. } if answer == 56.0));

        let q = generate(&atom, "mul-7#8", 0.9, STREAK_SCALE_THRESHOLD, "1.0.0", &mut rng).unwrap();
        match q.payload {
            QuestionPayload::Numeric { prompt, answer, .. } => {
                assert_eq!(prompt, "7 × 80 = ?");
                assert_eq!(answer, 560.0);
            }
            other => panic!("expected numeric, got {:?}", other),
        }
        // Scaling does not change the tracked fact
        assert_eq!(q.fact_id.as_deref(), Some("mul-7#8"));
    }

    #[test]
    fn test_atom_target_picks_operand_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let atom = times_table(4);
        for _ in 0..20 {
            let q = generate(&atom, "mul-4", 0.3, 0, "1.0.0", &mut rng).unwrap();
            let operand = parse_fact_operand(q.fact_id.as_deref().unwrap()).unwrap();
            assert!((1..=10).contains(&operand));
        }
    }

    #[test]
    fn test_atom_without_drill_spec() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut atom = times_table(2);
        atom.drill = None;
        assert!(generate(&atom, "mul-2", 0.3, 0, "1.0.0", &mut rng).is_none());
    }
}
