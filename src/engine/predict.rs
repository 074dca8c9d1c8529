//! Conditional sampling of unobserved features.

use serde::{Deserialize, Serialize};

use super::Engine;
use crate::data::{Datum, Value};
use crate::utils::scores_to_probs;

/// A partially observed row and the features to sample for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictQuery {
    pub id: String,
    /// One slot per schema feature; `None` is unobserved.
    pub data: Vec<Option<Datum>>,
    /// One flag per schema feature.
    pub to_predict: Vec<bool>,
    pub sample_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictResult {
    pub id: String,
    pub samples: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Engine {
    /// Draw `query.sample_count` completions of the query row.
    ///
    /// Each sample holds every observed entry plus a sampled datum for each
    /// requested feature that is unobserved. Kinds are independent given the
    /// observed data, so each kind draws a group from its posterior given the
    /// kind's observed entries, then draws its requested features from that
    /// group. A malformed query yields a result carrying `error`.
    pub fn predict_row(&mut self, query: &PredictQuery) -> PredictResult {
        let mut result = PredictResult {
            id: query.id.clone(),
            ..Default::default()
        };
        if !self.cross_cat.schema().is_valid_dense(&query.data) {
            result.error = Some("invalid query data".to_string());
            return result;
        }
        if query.data.len() != query.to_predict.len() {
            result.error = Some("observed size != to_predict size".to_string());
            return result;
        }
        if query.sample_count == 0 {
            return result;
        }

        let observed = Value::from_dense(&query.data);
        self.cross_cat.value_split(&observed, &mut self.partials);
        let kind_count = self.cross_cat.kind_count();
        let mut factors = vec![vec![Value::empty(); kind_count]; query.sample_count];
        let scores = &mut self.scratch.scores;
        for (kindid, kind) in self.cross_cat.kinds().iter().enumerate() {
            let to_sample: Vec<usize> = kind
                .featureids
                .iter()
                .enumerate()
                .filter(|&(_, &featureid)| query.to_predict[featureid] && query.data[featureid].is_none())
                .map(|(local, _)| local)
                .collect();
            if to_sample.is_empty() {
                continue;
            }
            kind.mixture.score(&kind.model, &self.partials[kindid], scores);
            scores_to_probs(scores);
            for sample in factors.iter_mut() {
                sample[kindid] = kind.mixture.sample_value(&kind.model, scores, &to_sample, &mut self.rng);
            }
        }

        result.samples = factors
            .iter()
            .map(|sampled| {
                let mut entries = observed.entries().to_vec();
                entries.extend_from_slice(self.cross_cat.value_join(sampled).entries());
                Value::new(entries)
            })
            .collect();
        result
    }

    /// Answer each query in turn. A malformed query does not stop the rest.
    pub fn predict(&mut self, queries: &[PredictQuery]) -> Vec<PredictResult> {
        queries.iter().map(|query| self.predict_row(query)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureType, Row, Schema};
    use crate::engine::EngineConfig;
    use crate::model::CrossCat;

    fn engine() -> Engine {
        let schema = Schema::new(vec![FeatureType::Boolean, FeatureType::Real, FeatureType::Count]);
        let cross_cat = CrossCat::from_partition(schema, &[0, 0, 1], 1, 1.0).unwrap();
        let mut engine = Engine::new(EngineConfig::default(), cross_cat);
        for i in 0..10u64 {
            let value = Value::new(vec![
                (0, Datum::Boolean(i < 5)),
                (1, Datum::Real(if i < 5 { -2.0 } else { 2.0 })),
                (2, Datum::Count(i as u32)),
            ]);
            engine.try_add_row(&Row::new(i, value));
        }
        engine
    }

    fn query(data: Vec<Option<Datum>>, to_predict: Vec<bool>, sample_count: usize) -> PredictQuery {
        PredictQuery {
            id: "q".to_string(),
            data,
            to_predict,
            sample_count,
        }
    }

    #[test]
    fn test_samples_echo_observed() {
        let mut engine = engine();
        let q = query(vec![Some(Datum::Boolean(true)), None, None], vec![false, true, true], 4);
        let result = engine.predict_row(&q);
        assert_eq!(result.error, None);
        assert_eq!(result.samples.len(), 4);
        for sample in &result.samples {
            assert_eq!(sample.get(0), Some(&Datum::Boolean(true)));
            assert!(matches!(sample.get(1), Some(Datum::Real(_))));
            assert!(matches!(sample.get(2), Some(Datum::Count(_))));
        }
    }

    #[test]
    fn test_observed_feature_is_not_resampled() {
        let mut engine = engine();
        let q = query(vec![None, Some(Datum::Real(0.5)), None], vec![true, true, false], 3);
        let result = engine.predict_row(&q);
        for sample in &result.samples {
            assert_eq!(sample.len(), 2);
            assert_eq!(sample.get(1), Some(&Datum::Real(0.5)));
        }
    }

    #[test]
    fn test_invalid_data() {
        let mut engine = engine();
        let q = query(vec![Some(Datum::Count(1)), None, None], vec![false, true, false], 2);
        let result = engine.predict_row(&q);
        assert_eq!(result.error.as_deref(), Some("invalid query data"));
        assert!(result.samples.is_empty());
    }

    #[test]
    fn test_mask_width_mismatch() {
        let mut engine = engine();
        let q = query(vec![None, None, None], vec![true], 2);
        let result = engine.predict_row(&q);
        assert_eq!(result.error.as_deref(), Some("observed size != to_predict size"));
    }

    #[test]
    fn test_zero_samples() {
        let mut engine = engine();
        let result = engine.predict_row(&query(vec![None, None, None], vec![true, true, true], 0));
        assert_eq!(result, PredictResult { id: "q".to_string(), ..Default::default() });
    }

    #[test]
    fn test_batch_continues_after_error() {
        let mut engine = engine();
        let queries = vec![
            query(vec![None], vec![true], 1),
            query(vec![None, None, None], vec![false, false, true], 2),
        ];
        let results = engine.predict(&queries);
        assert!(results[0].error.is_some());
        assert_eq!(results[1].samples.len(), 2);
    }
}
