//! Property-based tests for model selection and downsampling

use proptest::prelude::*;
use proptest::test_runner::TestRunner;
use rdtk::model::tabular::construct_csv;
use rdtk::model::{ContentsSelector, DecoderRegistry, Metadata, ModelClass, ModelRegistry, Selectors};
use rdtk::preprocess::{downsample_indices, BucketFilter};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

const NAMES: [&str; 4] = ["First", "Second", "Third", "Fourth"];

fn catch_all() -> Selectors {
    Selectors::new()
        .extensions(&[".csv"])
        .contents(ContentsSelector::pattern(".*").unwrap())
}

/// Test that the highest-priority matching class always wins
#[test]
fn test_selection_monotonicity_property() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &prop::collection::vec(-50i32..50, 1..=NAMES.len()),
            |priorities| {
                let registry = ModelRegistry::new(Arc::new(DecoderRegistry::with_builtins()));
                for (name, priority) in NAMES.iter().zip(&priorities) {
                    registry
                        .register(ModelClass::new(*name, *priority, catch_all(), construct_csv))
                        .unwrap();
                }
                let metadata = Metadata::from_document(
                    json!({"path": "/d/t.csv", "contents": "table"})
                        .as_object()
                        .cloned()
                        .unwrap(),
                );
                let selected = registry.select(&metadata).unwrap();
                let best = priorities.iter().copied().max().unwrap();
                assert_eq!(selected.priority, best);

                // Ties go to the class registered first
                let first_best = NAMES
                    .iter()
                    .zip(&priorities)
                    .find(|(_, p)| **p == best)
                    .map(|(name, _)| *name)
                    .unwrap();
                assert_eq!(selected.name, first_best);
                Ok(())
            },
        )
        .unwrap();
}

/// Test that downsampling keeps exactly one sample per occupied bucket
#[test]
fn test_downsample_bucket_property() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &(prop::collection::vec(0.0f64..100.0, 0..200), 0.1f64..20.0),
            |(mut timestamps, rate)| {
                timestamps.sort_by(|a, b| a.total_cmp(b));
                let kept = downsample_indices(&timestamps, rate);

                let buckets: BTreeSet<i64> = timestamps
                    .iter()
                    .map(|t| (t * rate).floor() as i64)
                    .collect();
                assert_eq!(kept.len(), buckets.len());
                assert!(kept.windows(2).all(|w| w[0] < w[1]));

                let mut filter = BucketFilter::new(Some(rate));
                let streamed: Vec<usize> = timestamps
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| filter.keep(**t))
                    .map(|(i, _)| i)
                    .collect();
                assert_eq!(kept, streamed);
                Ok(())
            },
        )
        .unwrap();
}
