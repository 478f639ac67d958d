use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PitchPoint {
    /// Seconds from the start of the reference audio.
    pub time_seconds: f64,
    /// Fundamental frequency, `None` for unvoiced frames.
    pub hz: Option<f32>,
}

impl PitchPoint {
    pub fn voiced(time_seconds: f64, hz: f32) -> Self {
        Self {
            time_seconds,
            hz: Some(hz),
        }
    }

    pub fn unvoiced(time_seconds: f64) -> Self {
        Self {
            time_seconds,
            hz: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PitchTrace {
    pub points: Vec<PitchPoint>,
}

impl PitchTrace {
    pub fn new(mut points: Vec<PitchPoint>) -> Self {
        points.sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: PitchPoint) {
        self.points.push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn voiced_count(&self) -> usize {
        self.points.iter().filter(|p| p.hz.is_some()).count()
    }

    /// Points whose time falls in `[start, end)`.
    pub fn window(&self, start_seconds: f64, end_seconds: f64) -> PitchTrace {
        PitchTrace {
            points: self
                .points
                .iter()
                .filter(|p| p.time_seconds >= start_seconds && p.time_seconds < end_seconds)
                .copied()
                .collect(),
        }
    }

    /// Nearest point to `time_seconds`, if any lies within `tolerance_seconds`.
    pub fn nearest(&self, time_seconds: f64, tolerance_seconds: f64) -> Option<&PitchPoint> {
        self.points
            .iter()
            .filter(|p| (p.time_seconds - time_seconds).abs() <= tolerance_seconds)
            .min_by(|a, b| {
                let da = (a.time_seconds - time_seconds).abs();
                let db = (b.time_seconds - time_seconds).abs();
                da.total_cmp(&db)
            })
    }
}

/// Signed distance in cents from `reference_hz` to `hz`.
pub fn cents_between(reference_hz: f32, hz: f32) -> f32 {
    1200.0 * (hz / reference_hz).log2()
}

/// Cent distance ignoring octave errors, in `[0, 600]`.
pub fn octave_folded_cents(reference_hz: f32, hz: f32) -> f32 {
    let cents = cents_between(reference_hz, hz).rem_euclid(1200.0);
    cents.min(1200.0 - cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_selects_half_open_range() {
        let trace = PitchTrace::new(vec![
            PitchPoint::voiced(1.0, 220.0),
            PitchPoint::voiced(0.5, 220.0),
            PitchPoint::unvoiced(2.0),
        ]);
        assert_eq!(trace.points[0].time_seconds, 0.5);
        let window = trace.window(0.5, 2.0);
        assert_eq!(window.len(), 2);
        assert_eq!(window.voiced_count(), 2);
    }

    #[test]
    fn nearest_respects_tolerance() {
        let trace = PitchTrace::new(vec![
            PitchPoint::voiced(1.0, 220.0),
            PitchPoint::voiced(1.1, 247.0),
        ]);
        assert_eq!(trace.nearest(1.08, 0.05).unwrap().hz, Some(247.0));
        assert!(trace.nearest(3.0, 0.05).is_none());
    }

    #[test]
    fn octave_folding() {
        assert!(octave_folded_cents(220.0, 440.0).abs() < 1e-3);
        assert!((cents_between(440.0, 880.0) - 1200.0).abs() < 1e-3);
        assert!((octave_folded_cents(440.0, 466.16) - 100.0).abs() < 0.1);
    }
}
