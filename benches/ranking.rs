//! Benchmarks for evidence aggregation.
//!
//! Benchmark targets:
//! - 50 fragments: <1ms
//! - 500 fragments: <10ms
//!
//! Covers validation, per-tier normalization, near-duplicate collapse and
//! the final weighted ranking.

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use groundline::config::RankingPolicy;
use groundline::models::{EvidenceFragment, SourceRef, Tier};
use groundline::services::{EvidenceAggregator, NormalizerRegistry, TierOutcome};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

const TOPICS: [&str; 6] = [
    "quarterly budget review for the vendor shortlist",
    "mobile launch moved to april after the beta",
    "hiring plan approved for two backend engineers",
    "customer churn rose in the enterprise segment",
    "security audit flagged the legacy login flow",
    "roadmap slide shows the analytics dashboard",
];

fn fragments(tier: Tier, count: usize) -> Vec<EvidenceFragment> {
    (0..count)
        .map(|i| {
            let source = match tier {
                Tier::SessionMemory => SourceRef::Transcript {
                    session_id: "bench".into(),
                    start_ms: i as u64 * 5000,
                    end_ms: i as u64 * 5000 + 4000,
                    speaker: None,
                },
                Tier::Documents => SourceRef::Document {
                    document_id: format!("doc-{}", i % 10),
                    title: "Planning notes".to_string(),
                    chunk_index: i,
                    page: None,
                },
                Tier::WebSearch | Tier::DeepResearch => SourceRef::Url {
                    url: format!("https://example.org/{i}"),
                    title: None,
                },
            };
            let text = format!("{} item {}", TOPICS[i % TOPICS.len()], i / TOPICS.len());
            EvidenceFragment::new(
                format!("t{}:bench:{i}", tier.number()),
                tier,
                source,
                text,
                ((i * 37) % 100) as f32 / 100.0,
                i as u64 * 5000,
            )
        })
        .collect()
}

fn outcomes(per_tier: usize) -> Vec<TierOutcome> {
    [Tier::SessionMemory, Tier::Documents, Tier::WebSearch]
        .into_iter()
        .map(|tier| TierOutcome {
            tier,
            fragments: fragments(tier, per_tier).into_iter().map(Arc::new).collect(),
            latency: Duration::from_millis(10),
            failure: None,
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let aggregator =
        EvidenceAggregator::new(RankingPolicy::default(), NormalizerRegistry::default(), 8);

    for per_tier in [16, 160] {
        let input = outcomes(per_tier);
        group.bench_with_input(
            BenchmarkId::from_parameter(per_tier * 3),
            &input,
            |b, input| b.iter(|| aggregator.aggregate(black_box(input), black_box(1_000_000))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
