use std::collections::BTreeMap;

use duet_domain::PitchTrace;
use serde::{Deserialize, Serialize};

use crate::config::{Aggregation, SessionConfig};
use crate::session::SegmentResult;

/// Accumulated attempts keyed by segment index, in attempt order.
pub type ResultMap = BTreeMap<usize, Vec<SegmentResult>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedScore {
    pub segment_index: usize,
    pub score: f32,
    pub attempts: usize,
    pub passed: bool,
    pub reference_pitch_trace: PitchTrace,
    pub student_pitch_trace: PitchTrace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionReport {
    pub segments: Vec<AggregatedScore>,
    /// Mean over attempted segments; `None` when nothing was attempted.
    pub overall_score: Option<f32>,
    pub passed_segments: usize,
    pub total_attempts: usize,
}

impl SessionReport {
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
            overall_score: None,
            passed_segments: 0,
            total_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultAggregator {
    policy: Aggregation,
    pass_threshold: f32,
}

impl ResultAggregator {
    pub fn new(policy: Aggregation, pass_threshold: f32) -> Self {
        Self {
            policy,
            pass_threshold,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.aggregation, config.pass_threshold)
    }

    pub fn aggregate(&self, results: &[SegmentResult]) -> Option<AggregatedScore> {
        let latest = results.last()?;
        let (score, traces) = match self.policy {
            Aggregation::Latest => (latest.score, latest),
            Aggregation::Best => {
                // `>=` keeps the later attempt on ties.
                let best = results[1..]
                    .iter()
                    .fold(&results[0], |best, r| if r.score >= best.score { r } else { best });
                (best.score, best)
            }
            Aggregation::Average => {
                let mean = results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32;
                (mean, latest)
            }
        };
        Some(AggregatedScore {
            segment_index: latest.segment_index,
            score,
            attempts: results.len(),
            passed: score >= self.pass_threshold,
            reference_pitch_trace: traces.reference_pitch_trace.clone(),
            student_pitch_trace: traces.student_pitch_trace.clone(),
        })
    }

    pub fn report(&self, results: &ResultMap) -> SessionReport {
        let segments: Vec<AggregatedScore> = results
            .values()
            .filter_map(|attempts| self.aggregate(attempts))
            .collect();
        let overall_score = if segments.is_empty() {
            None
        } else {
            Some(segments.iter().map(|s| s.score).sum::<f32>() / segments.len() as f32)
        };
        SessionReport {
            overall_score,
            passed_segments: segments.iter().filter(|s| s.passed).count(),
            total_attempts: segments.iter().map(|s| s.attempts).sum(),
            segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn attempts(segment_index: usize, scores: &[f32]) -> Vec<SegmentResult> {
        scores
            .iter()
            .enumerate()
            .map(|(attempt, &score)| SegmentResult {
                segment_index,
                attempt_index: attempt as u32,
                score,
                reference_pitch_trace: PitchTrace::empty(),
                student_pitch_trace: PitchTrace::new(vec![duet_domain::PitchPoint::voiced(
                    attempt as f64,
                    220.0,
                )]),
            })
            .collect()
    }

    #[test]
    fn policies_over_three_attempts() {
        let results = attempts(0, &[0.4, 0.9, 0.6]);
        let best = ResultAggregator::new(Aggregation::Best, 0.5)
            .aggregate(&results)
            .unwrap();
        let latest = ResultAggregator::new(Aggregation::Latest, 0.5)
            .aggregate(&results)
            .unwrap();
        let average = ResultAggregator::new(Aggregation::Average, 0.5)
            .aggregate(&results)
            .unwrap();
        assert_relative_eq!(best.score, 0.9);
        assert_relative_eq!(latest.score, 0.6);
        assert_relative_eq!(average.score, 0.6333333, epsilon = 1e-5);
        assert_eq!(best.attempts, 3);
        // Best shows the traces of the attempt it picked.
        assert_eq!(best.student_pitch_trace.points[0].time_seconds, 1.0);
        // Average shows the latest traces.
        assert_eq!(average.student_pitch_trace.points[0].time_seconds, 2.0);
    }

    #[test]
    fn best_breaks_ties_with_latest_attempt() {
        let results = attempts(2, &[0.7, 0.3, 0.7]);
        let best = ResultAggregator::new(Aggregation::Best, 0.5)
            .aggregate(&results)
            .unwrap();
        assert_eq!(best.student_pitch_trace.points[0].time_seconds, 2.0);
        assert_eq!(best.segment_index, 2);
    }

    #[test]
    fn empty_segment_has_no_score() {
        let aggregator = ResultAggregator::new(Aggregation::Latest, 0.5);
        assert!(aggregator.aggregate(&[]).is_none());
        assert_eq!(aggregator.report(&ResultMap::new()), SessionReport::empty());
    }

    #[test]
    fn overall_excludes_unattempted_segments() {
        let mut results = ResultMap::new();
        results.insert(0, attempts(0, &[0.2, 0.8]));
        results.insert(3, attempts(3, &[0.4]));
        results.insert(5, Vec::new());
        let report = ResultAggregator::new(Aggregation::Best, 0.5).report(&results);
        assert_eq!(report.segments.len(), 2);
        assert_relative_eq!(report.overall_score.unwrap(), 0.6, epsilon = 1e-6);
        assert_eq!(report.passed_segments, 1);
        assert_eq!(report.total_attempts, 3);
    }
}
