use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use zhangwo_algo::{
    bkt, AtomStatus, Atom, BktParams, Chapter, DrillOperation, DrillProgress, DrillSpec, MasteryMap,
    Question, QuestionPayload, RecentHistory, SelectionContext, SelectionEngine, SubjectBundle,
};

fn static_bundle(atoms: usize, questions_per_atom: usize) -> SubjectBundle {
    let chapter_atoms: Vec<Atom> = (0..atoms)
        .map(|i| Atom {
            id: format!("atom-{i}"),
            title: format!("Atom {i}"),
            prerequisites: if i == 0 { vec![] } else { vec![format!("atom-{}", i - 1)] },
            status: AtomStatus::Live,
            templates: vec![],
            drill: None,
        })
        .collect();

    let questions = (0..atoms)
        .flat_map(|i| {
            (0..questions_per_atom).map(move |j| Question {
                id: format!("q-{i}-{j}"),
                atom_id: format!("atom-{i}"),
                version: "1.0.0".to_string(),
                fact_id: None,
                payload: QuestionPayload::Numeric {
                    prompt: format!("{i} + {j} = ?"),
                    answer: (i + j) as f64,
                    tolerance: 0.0,
                },
            })
        })
        .collect();

    SubjectBundle {
        id: "bench".to_string(),
        title: "Bench".to_string(),
        curriculum: vec![Chapter {
            id: "c1".to_string(),
            title: "Chapter".to_string(),
            atoms: chapter_atoms,
        }],
        questions,
        version: "1.0.0".to_string(),
        last_updated: "2026-01-01T00:00:00Z".to_string(),
        is_dynamic: false,
    }
}

fn drill_bundle() -> SubjectBundle {
    let atoms = (2..=12)
        .map(|base| Atom {
            id: format!("mul-{base}"),
            title: format!("{base} times table"),
            prerequisites: vec![],
            status: AtomStatus::Live,
            templates: vec![],
            drill: Some(DrillSpec {
                operation: DrillOperation::Mul,
                base,
                min_operand: 1,
                max_operand: 12,
            }),
        })
        .collect();

    SubjectBundle {
        id: "tables".to_string(),
        title: "Tables".to_string(),
        curriculum: vec![Chapter {
            id: "tables".to_string(),
            title: "Tables".to_string(),
            atoms,
        }],
        questions: vec![],
        version: "1.0.0".to_string(),
        last_updated: "2026-01-01T00:00:00Z".to_string(),
        is_dynamic: true,
    }
}

fn bench_bkt_update(c: &mut Criterion) {
    let params = BktParams::default();
    c.bench_function("bkt_update", |b| {
        b.iter(|| params.update(black_box(0.42), black_box(true)))
    });

    c.bench_function("bkt_update_sequence_100", |b| {
        b.iter(|| {
            let mut p = 0.25;
            for i in 0..100 {
                p = bkt::update(p, i % 3 != 0);
            }
            black_box(p)
        })
    });
}

fn bench_static_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_selection");

    for atoms in [10, 50, 200] {
        let bundle = static_bundle(atoms, 8);
        let mastery: MasteryMap = (0..atoms / 2)
            .map(|i| (format!("atom-{i}"), 0.9))
            .collect();
        let recent = RecentHistory::default();
        let mut engine = SelectionEngine::with_seed(42);

        group.bench_with_input(BenchmarkId::from_parameter(atoms), &atoms, |b, _| {
            b.iter(|| black_box(engine.select_next(SelectionContext::new(&bundle, &mastery, &recent))))
        });
    }
    group.finish();
}

fn bench_drill_selection(c: &mut Criterion) {
    let bundle = drill_bundle();
    let mastery = MasteryMap::new();
    let recent = RecentHistory::default();
    let mut engine = SelectionEngine::with_seed(42);
    let mut progress = DrillProgress {
        current_stage: 5,
        ..DrillProgress::default()
    };

    c.bench_function("drill_selection", |b| {
        b.iter(|| {
            black_box(engine.select_next(
                SelectionContext::new(&bundle, &mastery, &recent).with_drill(&mut progress),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_bkt_update,
    bench_static_selection,
    bench_drill_selection
);
criterion_main!(benches);
