//! Integration tests for the single-pass, multi-pass and posterior drivers.

mod common;

use std::collections::HashMap;

use common::{bool_engine, bool_log, bool_row, engine_with, mixed_log};
use crosscats::data::{FeatureType, Schema};
use crosscats::model::GlobalId;
use crosscats::{Engine, EngineConfig, EngineError, PosteriorSample, Row, RowLog};
use rstest::rstest;
use tempfile::TempDir;

// =============================================================================
// Single pass
// =============================================================================

#[test]
fn test_single_pass_writes_one_assignment_per_row() {
    let (schema, log) = mixed_log(25, 1);
    let mut engine = engine_with(schema, &[0, 0, 0, 1, 1, 1, 1], EngineConfig::default());
    let mut out = Vec::<u8>::new();
    engine.infer_single_pass(&log, Some(&mut out)).unwrap();

    let lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
    assert_eq!(lines.len(), 25);
    let first: crosscats::Assignment = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first.rowid, 0);
    assert_eq!(first.groupids.len(), 2);
    assert_eq!(engine.count_untracked_rows(), 25);
    engine.validate();
}

#[test]
fn test_single_pass_rejects_schema_mismatch() {
    let (_, log) = mixed_log(5, 1);
    let mut engine = bool_engine(&[0, 0, 0, 0, 0, 0, 0]);
    let err = engine.infer_single_pass(&log, None).unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));
}

// =============================================================================
// Multi pass
// =============================================================================

#[rstest]
#[case(0.0)]
#[case(0.5)]
#[case(2.0)]
fn test_multi_pass_ends_with_every_row_assigned(#[case] extra_passes: f64) {
    let (schema, log) = mixed_log(40, 5);
    let mut engine = engine_with(schema, &[0, 0, 1, 1, 2, 2, 2], EngineConfig::default());
    engine.infer_multi_pass(&log, extra_passes).unwrap();
    assert_eq!(engine.assignments().len(), 40);
    assert_eq!(engine.count_untracked_rows(), 0);
    for kind in engine.cross_cat().kinds() {
        assert_eq!(kind.mixture.sample_size(), 40);
    }
    engine.validate();
}

#[test]
fn test_multi_pass_rejects_negative_passes() {
    let log = bool_log(4, 1);
    let mut engine = bool_engine(&[0]);
    let err = engine.infer_multi_pass(&log, -1.0).unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { name: "extra_passes", .. }));
}

#[test]
fn test_multi_pass_is_deterministic_for_a_seed() {
    let log = bool_log(30, 4);
    let run = || {
        let mut engine = bool_engine(&[0, 0, 1, 1]);
        engine.infer_multi_pass(&log, 1.5).unwrap();
        (0..2)
            .map(|k| engine.assignments().groupids(k).iter().copied().collect::<Vec<_>>())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_multi_pass_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.json");
    let groups = dir.path().join("groups.json");
    let assign = dir.path().join("assign.jsonl");

    let full = bool_log(24, 2);
    let first_half = RowLog::from_rows(full.rows()[..12].to_vec()).unwrap();
    let mut engine = bool_engine(&[0, 1]);
    engine.infer_multi_pass(&first_half, 1.0).unwrap();
    engine.dump(Some(model.as_path()), Some(groups.as_path()), Some(assign.as_path())).unwrap();

    let mut resumed = Engine::load(
        EngineConfig::default(),
        &model,
        Some(groups.as_path()),
        Some(assign.as_path()),
    )
    .unwrap();
    assert_eq!(resumed.assignments().len(), 12);
    assert_eq!(resumed.count_untracked_rows(), 0);
    resumed.validate();

    resumed.infer_multi_pass(&full, 1.0).unwrap();
    assert_eq!(resumed.assignments().len(), 24);
    resumed.validate();
}

#[test]
fn test_load_without_assignments_counts_untracked() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.json");
    let groups = dir.path().join("groups.json");
    let log = bool_log(10, 2);
    let mut engine = bool_engine(&[0, 0]);
    engine.infer_multi_pass(&log, 0.0).unwrap();
    engine.dump(Some(model.as_path()), Some(groups.as_path()), None).unwrap();

    let loaded = Engine::load(EngineConfig::default(), &model, Some(groups.as_path()), None).unwrap();
    assert_eq!(loaded.count_untracked_rows(), 10);
    loaded.validate();
}

#[test]
fn test_resume_with_rows_missing_from_log_is_an_error() {
    let log = bool_log(10, 2);
    let mut engine = bool_engine(&[0, 1]);
    engine.infer_multi_pass(&log, 0.0).unwrap();
    assert_eq!(engine.assignments().len(), 10);

    let tail = RowLog::from_rows(log.rows()[5..].to_vec()).unwrap();
    let err = engine.infer_multi_pass(&tail, 1.0).unwrap_err();
    assert!(matches!(err, EngineError::RowLog(_)));
    // Nothing was retracted.
    assert_eq!(engine.assignments().len(), 10);
    engine.validate();
}

#[test]
fn test_multi_pass_with_sized_thread_pool() {
    let (schema, log) = mixed_log(30, 4);
    let config = EngineConfig::builder().n_threads(2).seed(3).build().unwrap();
    let mut engine = engine_with(schema, &[0, 0, 1, 1, 2, 2, 2], config);
    engine.infer_multi_pass(&log, 1.0).unwrap();
    assert_eq!(engine.assignments().len(), 30);
    engine.validate();
}

// =============================================================================
// Posterior enumeration
// =============================================================================

#[test]
fn test_posterior_enum_sample_shape() {
    let log = bool_log(6, 3);
    let mut engine = bool_engine(&[0, 1, 1]);
    let samples: Vec<PosteriorSample> = engine.posterior_enum(log.rows(), 5, 2).unwrap();
    assert_eq!(samples.len(), 5);
    for sample in &samples {
        assert_eq!(sample.featureid_to_kindid, vec![0, 1, 1]);
        assert_eq!(sample.kinds.len(), 2);
        assert!(sample.kinds.iter().all(|groups| groups.len() == 6));
    }
    engine.validate();
}

#[test]
fn test_posterior_enum_requires_dense_rowids() {
    let log = bool_log(4, 1);
    let rows = &log.rows()[1..];
    let mut engine = bool_engine(&[0]);
    assert!(matches!(engine.posterior_enum(rows, 1, 1), Err(EngineError::RowLog(_))));
}

/// Restricted growth strings: every set partition of `n` items exactly once.
fn set_partitions(n: usize) -> Vec<Vec<usize>> {
    fn extend(prefix: &mut Vec<usize>, n: usize, out: &mut Vec<Vec<usize>>) {
        if prefix.len() == n {
            out.push(prefix.clone());
            return;
        }
        let next = prefix.iter().max().map_or(0, |&m| m + 1);
        for label in 0..=next {
            prefix.push(label);
            extend(prefix, n, out);
            prefix.pop();
        }
    }
    let mut out = Vec::new();
    extend(&mut Vec::new(), n, &mut out);
    out
}

/// Relabel group ids by first appearance.
fn canonical(groupids: &[GlobalId]) -> Vec<usize> {
    let mut labels: HashMap<GlobalId, usize> = HashMap::new();
    groupids
        .iter()
        .map(|g| {
            let next = labels.len();
            *labels.entry(*g).or_insert(next)
        })
        .collect()
}

fn ln_factorial(n: usize) -> f64 {
    (1..=n).map(|k| (k as f64).ln()).sum()
}

/// Unnormalized log posterior of a partition under CRP(1) and independent
/// Beta(1, 1)-Bernoulli features.
fn log_posterior(partition: &[usize], data: &[[bool; 2]]) -> f64 {
    let group_count = partition.iter().max().map_or(0, |&m| m + 1);
    let mut score = 0.0;
    for group in 0..group_count {
        let members: Vec<&[bool; 2]> = partition
            .iter()
            .zip(data)
            .filter(|&(&label, _)| label == group)
            .map(|(_, bits)| bits)
            .collect();
        score += ln_factorial(members.len() - 1);
        for feature in 0..2 {
            let heads = members.iter().filter(|bits| bits[feature]).count();
            let tails = members.len() - heads;
            score += ln_factorial(heads) + ln_factorial(tails) - ln_factorial(members.len() + 1);
        }
    }
    score
}

#[rstest]
#[case::one_empty_group(1)]
#[case::three_empty_groups(3)]
fn test_posterior_enum_matches_exact_posterior(#[case] empty_group_count: usize) {
    let data = [[true, true], [true, true], [false, false], [true, false]];
    let rows: Vec<Row> = data.iter().enumerate().map(|(i, bits)| bool_row(i as u64, bits)).collect();
    let config = EngineConfig::builder()
        .empty_group_count(empty_group_count)
        .seed(17)
        .build()
        .unwrap();
    let mut engine = engine_with(Schema::new(vec![FeatureType::Boolean; 2]), &[0, 0], config);
    let samples = engine.posterior_enum(&rows, 40_000, 1).unwrap();

    let partitions = set_partitions(rows.len());
    assert_eq!(partitions.len(), 15);
    let scores: Vec<f64> = partitions.iter().map(|p| log_posterior(p, &data)).collect();
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let total: f64 = scores.iter().map(|s| (s - max).exp()).sum();

    let mut counts: HashMap<Vec<usize>, usize> = HashMap::new();
    for sample in &samples {
        *counts.entry(canonical(&sample.kinds[0])).or_default() += 1;
    }
    assert!(counts.keys().all(|p| partitions.contains(p)));
    for (partition, score) in partitions.iter().zip(&scores) {
        let exact = (score - max).exp() / total;
        let sampled = counts.get(partition).copied().unwrap_or(0) as f64 / samples.len() as f64;
        assert!(
            (sampled - exact).abs() < 0.02,
            "{partition:?}: sampled {sampled:.4}, exact {exact:.4}"
        );
    }
}
