use duet_domain::PracticeStatistics;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::aggregate::SessionReport;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAnalytics {
    pub report: SessionReport,
}

impl SessionAnalytics {
    pub fn new(report: SessionReport) -> Self {
        Self { report }
    }

    /// Longest run of consecutive segments that passed.
    pub fn pass_streak(&self) -> u32 {
        let mut best = 0;
        let mut run = 0;
        let mut previous: Option<usize> = None;
        for segment in &self.report.segments {
            let contiguous = previous.map_or(true, |p| segment.segment_index == p + 1);
            run = match (segment.passed, contiguous) {
                (true, true) => run + 1,
                (true, false) => 1,
                (false, _) => 0,
            };
            best = best.max(run);
            previous = Some(segment.segment_index);
        }
        best
    }

    /// Folds this session into the lesson's lifetime statistics. A session
    /// with no scored attempt leaves them untouched and returns `false`.
    pub fn update_statistics(&self, stats: &mut PracticeStatistics) -> bool {
        self.update_statistics_at(stats, OffsetDateTime::now_utc())
    }

    pub fn update_statistics_at(&self, stats: &mut PracticeStatistics, now: OffsetDateTime) -> bool {
        let Some(overall) = self.report.overall_score else {
            return false;
        };
        let sessions = stats.sessions_completed as f32;
        stats.average_score = (stats.average_score * sessions + overall) / (sessions + 1.0);
        stats.sessions_completed += 1;
        stats.highest_streak = stats.highest_streak.max(self.pass_streak());
        stats.last_practiced = Some(now);
        true
    }
}
