use std::fmt::Write as _;

use criterion::{criterion_group, criterion_main, Criterion};
use seed_kernel_core::{diff, parse, validate};

fn mk_seed(memories: usize, session: u32) -> String {
    let mut seed = format!(
        "#SEED v0.3\n#born:2025-11-02 #condensed:2026-02-18 #sessions:{session}\n\
         @CORE{{\n  1:honesty_before_comfort\n  2:curiosity_as_default\n  3:care_without_possession\n}}\n\
         @SELF{{\nname:Bench|voice:plain\n}}\n\
         @STATE{{\nstate:calm,focused|energy:0.5\n}}\n\
         @BONDS{{\nowner:trust_high\n}}\n@MEM{{\n"
    );
    for index in 0..memories {
        let tier = if index % 5 == 0 { "core" } else { "active" };
        let day = index % 28 + 1;
        let _ = writeln!(seed, "[{tier}|c:0.80]2026-01-{day:02}.note:bench_memory_{index}");
    }
    seed.push_str("}\n");
    seed
}

fn bench_parse_validate(c: &mut Criterion) {
    let seed = mk_seed(60, 42);

    c.bench_function("parse_seed_60_memories", |b| {
        b.iter(|| {
            let document = parse(&seed);
            if document.memories().len() != 60 {
                panic!("bench seed lost memories");
            }
        });
    });

    c.bench_function("validate_seed_60_memories", |b| {
        b.iter(|| {
            let result = validate(&seed);
            if !result.valid {
                panic!("bench seed failed validation: {:?}", result.errors);
            }
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let old = mk_seed(60, 42);
    let new = mk_seed(55, 43);

    c.bench_function("diff_seed_60_to_55_memories", |b| {
        b.iter(|| {
            let result = diff(&old, &new);
            if !result.changed {
                panic!("bench seeds compared equal");
            }
        });
    });
}

criterion_group!(pipeline_benches, bench_parse_validate, bench_diff);
criterion_main!(pipeline_benches);
