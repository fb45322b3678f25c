//! Benchmarks for exposure counting and divergence
//!
//! Run with: cargo bench --package fairness
//!
//! Uses a synthetic day of exposure logs so no dataset files are needed.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use data_loader::{ExposureLogEntry, RatingCounts};
use fairness::{FairnessAuditor, LightUserPolicy};

const GENRES: &[&str] = &[
    "Action", "Adventure", "Animation", "Children's", "Comedy", "Crime", "Drama", "Horror",
    "Romance", "Sci-Fi", "Thriller",
];

fn synthetic_auditor() -> FairnessAuditor {
    let mut ratings = RatingCounts::new();
    for user in 1..=6040u32 {
        for _ in 0..(user % 40) {
            ratings.record(user);
        }
    }
    FairnessAuditor::new(ratings, LightUserPolicy::default())
}

fn synthetic_entries(n: usize) -> Vec<ExposureLogEntry> {
    (0..n)
        .map(|i| {
            let genres = (0..20)
                .map(|k| GENRES[(i * 7 + k * 3) % GENRES.len()].to_string())
                .collect();
            ExposureLogEntry::new((i % 6040) as u32 + 1, genres)
        })
        .collect()
}

fn bench_tally_entries(c: &mut Criterion) {
    let auditor = synthetic_auditor();
    let entries = synthetic_entries(50_000);

    c.bench_function("tally_50k_entries", |b| {
        b.iter(|| black_box(auditor.tally_entries(black_box(&entries))))
    });
}

fn bench_report(c: &mut Criterion) {
    let auditor = synthetic_auditor();
    let tally = auditor.tally_entries(&synthetic_entries(50_000));

    c.bench_function("report_from_tally", |b| {
        b.iter(|| black_box(auditor.report(black_box(tally.clone())).unwrap()))
    });
}

criterion_group!(benches, bench_tally_entries, bench_report);
criterion_main!(benches);
