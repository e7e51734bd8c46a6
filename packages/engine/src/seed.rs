//! 演示内容
//!
//! 一个静态内容包 (分数) 与一个动态训练包 (乘法表)，供离线演示与本地开发使用。

use zhangwo_algo::{
    Atom, AtomStatus, Chapter, DrillOperation, DrillSpec, Question, QuestionPayload, SubjectBundle,
    TemplateId,
};

use crate::remote::MemoryRemoteStore;

pub const FRACTIONS_BUNDLE_ID: &str = "fractions";
pub const TIMES_TABLES_BUNDLE_ID: &str = "times-tables";

const SEED_VERSION: &str = "1.0.0";
const SEED_STAMP: &str = "2026-01-01T00:00:00.000Z";

fn atom(id: &str, title: &str, prerequisites: &[&str], templates: Vec<TemplateId>) -> Atom {
    Atom {
        id: id.to_string(),
        title: title.to_string(),
        prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
        status: AtomStatus::Live,
        templates,
        drill: None,
    }
}

fn question(id: &str, atom_id: &str, payload: QuestionPayload) -> Question {
    Question {
        id: id.to_string(),
        atom_id: atom_id.to_string(),
        version: SEED_VERSION.to_string(),
        fact_id: None,
        payload,
    }
}

fn mcq(prompt: &str, options: &[&str], answer_index: usize) -> QuestionPayload {
    QuestionPayload::Mcq {
        prompt: prompt.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        answer_index,
    }
}

fn number_line(prompt: &str, target: f64) -> QuestionPayload {
    QuestionPayload::NumberLine {
        prompt: prompt.to_string(),
        min: 0.0,
        max: 1.0,
        target,
        tolerance: 0.05,
    }
}

/// 分数：三个知识点组成前置链，外加一个草稿知识点
pub fn fractions_bundle() -> SubjectBundle {
    let mut draft = atom("fraction-division", "Dividing fractions", &["compare-fractions"], vec![]);
    draft.status = AtomStatus::Draft;

    let curriculum = vec![
        Chapter {
            id: "fraction-basics".to_string(),
            title: "Fraction basics".to_string(),
            atoms: vec![
                atom("halves", "Halves", &[], vec![TemplateId::Mcq, TemplateId::NumberLine]),
                atom(
                    "quarters",
                    "Quarters",
                    &["halves"],
                    vec![TemplateId::Mcq, TemplateId::NumberLine],
                ),
            ],
        },
        Chapter {
            id: "fraction-comparison".to_string(),
            title: "Comparing fractions".to_string(),
            atoms: vec![
                atom("compare-fractions", "Comparing fractions", &["quarters"], vec![TemplateId::Sorting]),
                draft,
            ],
        },
    ];

    let mut questions = Vec::new();
    for (i, (prompt, target)) in [
        ("Place 1/2 on the number line", 0.5),
        ("Place 2/4 on the number line", 0.5),
        ("Place 3/6 on the number line", 0.5),
    ]
    .into_iter()
    .enumerate()
    {
        questions.push(question(&format!("halves-nl-{i}"), "halves", number_line(prompt, target)));
    }
    questions.push(question(
        "halves-mcq-0",
        "halves",
        mcq("What is half of 8?", &["2", "4", "6", "16"], 1),
    ));
    questions.push(question(
        "halves-mcq-1",
        "halves",
        mcq("Which fraction equals 1/2?", &["1/3", "2/3", "3/6", "3/4"], 2),
    ));

    for (i, (prompt, target)) in [
        ("Place 1/4 on the number line", 0.25),
        ("Place 3/4 on the number line", 0.75),
    ]
    .into_iter()
    .enumerate()
    {
        questions.push(question(&format!("quarters-nl-{i}"), "quarters", number_line(prompt, target)));
    }
    questions.push(question(
        "quarters-mcq-0",
        "quarters",
        mcq("What is a quarter of 12?", &["2", "3", "4", "6"], 1),
    ));

    questions.push(question(
        "compare-sort-0",
        "compare-fractions",
        QuestionPayload::Sorting {
            prompt: "Order from smallest to largest".to_string(),
            items: vec!["3/4".to_string(), "1/4".to_string(), "1/2".to_string()],
            correct_order: vec![1, 2, 0],
        },
    ));
    questions.push(question(
        "compare-two-tier-0",
        "compare-fractions",
        QuestionPayload::TwoTier {
            prompt: "Which is larger: 2/3 or 3/4?".to_string(),
            options: vec!["2/3".to_string(), "3/4".to_string()],
            answer_index: 1,
            reasons: vec![
                "It has the larger numerator".to_string(),
                "Its missing piece is smaller".to_string(),
            ],
            reason_index: 1,
        },
    ));

    SubjectBundle {
        id: FRACTIONS_BUNDLE_ID.to_string(),
        title: "Fractions".to_string(),
        curriculum,
        questions,
        version: SEED_VERSION.to_string(),
        last_updated: SEED_STAMP.to_string(),
        is_dynamic: false,
    }
}

fn drill_atom(table: i64) -> Atom {
    Atom {
        id: format!("mul-{table}"),
        title: format!("{table} times table"),
        prerequisites: vec![],
        status: AtomStatus::Live,
        templates: vec![TemplateId::Mcq, TemplateId::Numeric],
        drill: Some(DrillSpec {
            operation: DrillOperation::Mul,
            base: table,
            min_operand: 1,
            max_operand: 10,
        }),
    }
}

/// 乘法表：每个阶段一个知识点，题目全部程序化生成
pub fn times_tables_bundle() -> SubjectBundle {
    SubjectBundle {
        id: TIMES_TABLES_BUNDLE_ID.to_string(),
        title: "Times tables".to_string(),
        curriculum: vec![Chapter {
            id: "tables".to_string(),
            title: "Times tables".to_string(),
            atoms: [2, 5, 10, 3, 4].into_iter().map(drill_atom).collect(),
        }],
        questions: vec![],
        version: SEED_VERSION.to_string(),
        last_updated: SEED_STAMP.to_string(),
        is_dynamic: true,
    }
}

/// 向进程内远端发布演示内容
pub fn seed_demo_content(remote: &MemoryRemoteStore) {
    remote.seed_bundle(fractions_bundle());
    remote.seed_bundle(times_tables_bundle());
    tracing::info!("seeded demo bundles");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_questions_reference_known_atoms() {
        let bundle = fractions_bundle();
        for question in &bundle.questions {
            assert!(
                bundle.find_atom(&question.atom_id).is_some(),
                "{} points at unknown atom {}",
                question.id,
                question.atom_id
            );
        }
    }

    #[test]
    fn test_times_tables_are_dynamic_drills() {
        let bundle = times_tables_bundle();
        assert!(bundle.is_dynamic);
        assert!(bundle.atoms().all(|(_, atom)| atom.drill.is_some()));
    }
}
