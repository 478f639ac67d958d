use std::collections::HashMap;

use duet_audio::{estimate_pitch, AudioBuffer};
use duet_domain::pitch::octave_folded_cents;
use duet_domain::{PitchPoint, PitchTrace, PracticeMode, Segment};

use crate::error::EvaluatorError;
use crate::session::SegmentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptHandle(pub u64);

/// Running figures an evaluator may expose while an attempt is captured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialEvaluation {
    pub pitch_hz: Option<f32>,
}

/// Scores one attempt from incrementally fed microphone buffers.
pub trait Evaluator: Send {
    fn begin_attempt(
        &mut self,
        segment: &Segment,
        mode: PracticeMode,
        attempt_index: u32,
    ) -> Result<AttemptHandle, EvaluatorError>;

    fn feed(
        &mut self,
        handle: AttemptHandle,
        buffer: &AudioBuffer,
    ) -> Result<Option<PartialEvaluation>, EvaluatorError>;

    fn finalize(&mut self, handle: AttemptHandle) -> Result<SegmentResult, EvaluatorError>;

    fn discard(&mut self, handle: AttemptHandle);
}

struct ContourAttempt {
    segment_index: usize,
    attempt_index: u32,
    window_start: f64,
    elapsed_seconds: f64,
    frame_seconds: f64,
    reference: PitchTrace,
    student: PitchTrace,
}

/// Compares per-buffer zero-crossing pitch against a reference contour,
/// ignoring octave errors.
pub struct ContourEvaluator {
    reference: PitchTrace,
    tolerance_cents: f32,
    gate: f32,
    next_handle: u64,
    attempts: HashMap<AttemptHandle, ContourAttempt>,
}

impl ContourEvaluator {
    pub fn new(reference: PitchTrace) -> Self {
        Self {
            reference,
            tolerance_cents: 100.0,
            gate: 0.01,
            next_handle: 0,
            attempts: HashMap::new(),
        }
    }

    pub fn with_tolerance_cents(mut self, cents: f32) -> Self {
        self.tolerance_cents = cents;
        self
    }

    pub fn open_attempts(&self) -> usize {
        self.attempts.len()
    }

    fn score(&self, attempt: &ContourAttempt) -> f32 {
        let student = &attempt.student;
        if student.is_empty() {
            return 0.0;
        }
        let voiced_reference: Vec<&PitchPoint> = attempt
            .reference
            .points
            .iter()
            .filter(|p| p.hz.is_some())
            .collect();
        if voiced_reference.is_empty() {
            return student.voiced_count() as f32 / student.len() as f32;
        }
        let tolerance_seconds = attempt.frame_seconds.max(0.05);
        let matched = voiced_reference
            .iter()
            .filter(|reference| {
                let (Some(reference_hz), Some(student_point)) = (
                    reference.hz,
                    student.nearest(reference.time_seconds, tolerance_seconds),
                ) else {
                    return false;
                };
                student_point
                    .hz
                    .map(|hz| octave_folded_cents(reference_hz, hz) <= self.tolerance_cents)
                    .unwrap_or(false)
            })
            .count();
        matched as f32 / voiced_reference.len() as f32
    }
}

impl Evaluator for ContourEvaluator {
    fn begin_attempt(
        &mut self,
        segment: &Segment,
        mode: PracticeMode,
        attempt_index: u32,
    ) -> Result<AttemptHandle, EvaluatorError> {
        let (start, end) = segment.capture_range(mode);
        let handle = AttemptHandle(self.next_handle);
        self.next_handle += 1;
        self.attempts.insert(
            handle,
            ContourAttempt {
                segment_index: segment.index,
                attempt_index,
                window_start: start,
                elapsed_seconds: 0.0,
                frame_seconds: 0.0,
                reference: self.reference.window(start, end),
                student: PitchTrace::empty(),
            },
        );
        Ok(handle)
    }

    fn feed(
        &mut self,
        handle: AttemptHandle,
        buffer: &AudioBuffer,
    ) -> Result<Option<PartialEvaluation>, EvaluatorError> {
        let gate = self.gate;
        let attempt = self
            .attempts
            .get_mut(&handle)
            .ok_or(EvaluatorError::UnknownAttempt(handle.0))?;
        let hz = estimate_pitch(&buffer.samples, buffer.sample_rate, gate);
        attempt.student.push(PitchPoint {
            time_seconds: attempt.window_start + attempt.elapsed_seconds,
            hz,
        });
        attempt.frame_seconds = buffer.duration_seconds();
        attempt.elapsed_seconds += attempt.frame_seconds;
        Ok(Some(PartialEvaluation { pitch_hz: hz }))
    }

    fn finalize(&mut self, handle: AttemptHandle) -> Result<SegmentResult, EvaluatorError> {
        let attempt = self
            .attempts
            .remove(&handle)
            .ok_or(EvaluatorError::UnknownAttempt(handle.0))?;
        let score = self.score(&attempt);
        Ok(SegmentResult {
            segment_index: attempt.segment_index,
            attempt_index: attempt.attempt_index,
            score,
            reference_pitch_trace: attempt.reference,
            student_pitch_trace: attempt.student,
        })
    }

    fn discard(&mut self, handle: AttemptHandle) {
        self.attempts.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(hz: f32, len: usize) -> AudioBuffer {
        let mut samples = vec![0.0; len];
        duet_audio::dsp::sine_into(&mut samples, hz, 16_000, 0.5, 0.0);
        AudioBuffer::new(samples, 16_000)
    }

    fn reference(hz: f32) -> PitchTrace {
        PitchTrace::new(
            (0..10)
                .map(|i| PitchPoint::voiced(i as f64 * 0.1, hz))
                .collect(),
        )
    }

    #[test]
    fn matching_tone_scores_high() {
        let mut evaluator = ContourEvaluator::new(reference(220.0));
        let segment = Segment::new(0, 0.0, 1.0, "la");
        let handle = evaluator
            .begin_attempt(&segment, PracticeMode::Singalong, 0)
            .unwrap();
        for _ in 0..16 {
            let partial = evaluator.feed(handle, &tone(440.0, 1_024)).unwrap().unwrap();
            assert!(partial.pitch_hz.is_some());
        }
        let result = evaluator.finalize(handle).unwrap();
        assert!(result.score > 0.9, "score {}", result.score);
        assert_eq!(result.reference_pitch_trace.len(), 10);
        assert_eq!(result.student_pitch_trace.len(), 16);
        assert_eq!(evaluator.open_attempts(), 0);
    }

    #[test]
    fn tolerance_decides_whether_a_whole_tone_counts() {
        let segment = Segment::new(0, 0.0, 1.0, "la");
        let score_with = |mut evaluator: ContourEvaluator| {
            let handle = evaluator
                .begin_attempt(&segment, PracticeMode::Singalong, 0)
                .unwrap();
            for _ in 0..16 {
                evaluator.feed(handle, &tone(247.0, 1_024)).unwrap();
            }
            evaluator.finalize(handle).unwrap().score
        };
        let strict = score_with(ContourEvaluator::new(reference(220.0)));
        let lenient =
            score_with(ContourEvaluator::new(reference(220.0)).with_tolerance_cents(300.0));
        assert!(strict < 0.1, "strict score {strict}");
        assert!(lenient > 0.9, "lenient score {lenient}");
    }

    #[test]
    fn silence_scores_zero() {
        let mut evaluator = ContourEvaluator::new(reference(220.0));
        let segment = Segment::new(0, 0.0, 1.0, "la");
        let handle = evaluator
            .begin_attempt(&segment, PracticeMode::Singalong, 1)
            .unwrap();
        for _ in 0..16 {
            evaluator
                .feed(handle, &AudioBuffer::silence(1_024, 16_000))
                .unwrap();
        }
        let result = evaluator.finalize(handle).unwrap();
        assert_eq!(result.score, 0.0);
        assert_eq!(result.attempt_index, 1);
    }

    #[test]
    fn singafter_windows_on_student_range() {
        let mut evaluator = ContourEvaluator::new(reference(330.0));
        let segment = Segment::new(0, 0.0, 0.5, "call").with_student_range(0.5, 1.0);
        let handle = evaluator
            .begin_attempt(&segment, PracticeMode::Singafter, 0)
            .unwrap();
        let result = evaluator.finalize(handle).unwrap();
        assert_eq!(result.reference_pitch_trace.len(), 5);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn discarded_attempt_is_forgotten() {
        let mut evaluator = ContourEvaluator::new(PitchTrace::empty());
        let segment = Segment::new(0, 0.0, 1.0, "");
        let handle = evaluator
            .begin_attempt(&segment, PracticeMode::Singalong, 0)
            .unwrap();
        evaluator.discard(handle);
        assert_eq!(
            evaluator.feed(handle, &AudioBuffer::silence(16, 16_000)),
            Err(EvaluatorError::UnknownAttempt(0))
        );
        assert!(evaluator.finalize(handle).is_err());
    }
}
