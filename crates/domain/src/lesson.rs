use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{error::DomainError, pitch::PitchTrace};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PracticeMode {
    /// Student sings over the reference audio.
    #[default]
    Singalong,
    /// A teacher range plays first, then the student answers.
    Singafter,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_start_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_end_seconds: Option<f64>,
}

impl Segment {
    pub fn new(index: usize, start_seconds: f64, end_seconds: f64, lyrics: impl Into<String>) -> Self {
        Self {
            index,
            start_seconds,
            end_seconds,
            lyrics: lyrics.into(),
            student_start_seconds: None,
            student_end_seconds: None,
        }
    }

    pub fn with_student_range(mut self, start_seconds: f64, end_seconds: f64) -> Self {
        self.student_start_seconds = Some(start_seconds);
        self.student_end_seconds = Some(end_seconds);
        self
    }

    pub fn student_range(&self) -> Option<(f64, f64)> {
        match (self.student_start_seconds, self.student_end_seconds) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Range during which the reference (teacher) audio is heard.
    pub fn teacher_range(&self) -> (f64, f64) {
        (self.start_seconds, self.end_seconds)
    }

    /// Range during which the microphone is captured and scored.
    pub fn capture_range(&self, mode: PracticeMode) -> (f64, f64) {
        match mode {
            PracticeMode::Singalong => self.teacher_range(),
            PracticeMode::Singafter => self.student_range().unwrap_or(self.teacher_range()),
        }
    }

    fn validate(&self, position: usize, mode: PracticeMode) -> Result<(), DomainError> {
        if self.index != position {
            return Err(DomainError::validation(format!(
                "segment at position {} declares index {}",
                position, self.index
            )));
        }
        check_range(self.index, "segment", self.start_seconds, self.end_seconds)?;
        match (self.student_start_seconds, self.student_end_seconds) {
            (Some(start), Some(end)) => check_range(self.index, "student range", start, end)?,
            (None, None) if mode == PracticeMode::Singafter => {
                return Err(DomainError::validation(format!(
                    "segment {} has no student range in a singafter lesson",
                    self.index
                )))
            }
            (None, None) => {}
            _ => {
                return Err(DomainError::validation(format!(
                    "segment {} has a half-open student range",
                    self.index
                )))
            }
        }
        Ok(())
    }
}

fn check_range(index: usize, what: &str, start: f64, end: f64) -> Result<(), DomainError> {
    if !start.is_finite() || !end.is_finite() || start < 0.0 {
        return Err(DomainError::validation(format!(
            "segment {} {} has invalid timestamps",
            index, what
        )));
    }
    if end <= start {
        return Err(DomainError::validation(format!(
            "segment {} {} ends at {} before it starts at {}",
            index, what, end, start
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PracticeStatistics {
    pub average_score: f32,
    pub highest_streak: u32,
    pub sessions_completed: u32,
    pub last_practiced: Option<OffsetDateTime>,
}

impl PracticeStatistics {
    pub fn new() -> Self {
        Self {
            average_score: 0.0,
            highest_streak: 0,
            sessions_completed: 0,
            last_practiced: None,
        }
    }
}

impl Default for PracticeStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LessonDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub mode: PracticeMode,
    /// Locator of the reference audio handed to the playback port.
    pub reference_audio: String,
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_contour: Option<PitchTrace>,
    #[serde(default)]
    pub stats: PracticeStatistics,
}

impl LessonDescriptor {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        mode: PracticeMode,
        reference_audio: impl Into<String>,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            mode,
            reference_audio: reference_audio.into(),
            segments,
            reference_contour: None,
            stats: PracticeStatistics::new(),
        }
    }

    pub fn with_reference_contour(mut self, contour: PitchTrace) -> Self {
        self.reference_contour = Some(contour);
        self
    }

    pub fn segment_model(&self) -> Result<SegmentModel, DomainError> {
        SegmentModel::new(self.mode, self.segments.clone())
    }
}

/// Validated, immutable view over a lesson's segments.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentModel {
    mode: PracticeMode,
    segments: Arc<[Segment]>,
}

impl SegmentModel {
    pub fn new(mode: PracticeMode, segments: Vec<Segment>) -> Result<Self, DomainError> {
        if segments.is_empty() {
            return Err(DomainError::validation("lesson has no segments"));
        }
        for (position, segment) in segments.iter().enumerate() {
            segment.validate(position, mode)?;
        }
        Ok(Self {
            mode,
            segments: segments.into(),
        })
    }

    pub fn mode(&self) -> PracticeMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.segments.len()
    }
}
