use std::collections::BTreeSet;

use duet_domain::PitchTrace;
use serde::{Deserialize, Serialize};

use crate::error::ReportedError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    /// Teacher range of a call-and-response segment is playing.
    Listening,
    Practicing,
    Evaluating,
    SegmentComplete,
    SessionComplete,
    Cancelled,
    Error(String),
}

impl Phase {
    /// An attempt is in flight and the ports are running.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Listening | Phase::Practicing)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Phase::Error(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentResult {
    pub segment_index: usize,
    pub attempt_index: u32,
    pub score: f32,
    pub reference_pitch_trace: PitchTrace,
    pub student_pitch_trace: PitchTrace,
}

/// Read-only snapshot published to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub active_segment_index: usize,
    /// Retries consumed on the active segment.
    pub attempt_count: u32,
    pub current_pitch: f32,
    pub segment_progress: f32,
    pub completed_segments: BTreeSet<usize>,
    pub last_result: Option<SegmentResult>,
    pub paused: bool,
    pub last_error: Option<ReportedError>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            active_segment_index: 0,
            attempt_count: 0,
            current_pitch: 0.0,
            segment_progress: 0.0,
            completed_segments: BTreeSet::new(),
            last_result: None,
            paused: false,
            last_error: None,
        }
    }

    pub(crate) fn reset_progress(&mut self) {
        self.current_pitch = 0.0;
        self.segment_progress = 0.0;
        self.paused = false;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
