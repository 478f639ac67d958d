use std::f32::consts::TAU;

const MIN_PITCH_HZ: f32 = 50.0;
const MAX_PITCH_HZ: f32 = 2_000.0;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Rough fundamental estimate from rising zero crossings. Returns `None` for
/// frames below `gate` RMS or outside the singing range.
pub fn estimate_pitch(samples: &[f32], sample_rate: u32, gate: f32) -> Option<f32> {
    if samples.len() < 2 || rms(samples) < gate {
        return None;
    }
    let mut first = None;
    let mut last = 0usize;
    let mut crossings = 0usize;
    for i in 1..samples.len() {
        if samples[i - 1] < 0.0 && samples[i] >= 0.0 {
            first.get_or_insert(i);
            last = i;
            crossings += 1;
        }
    }
    let first = first?;
    if crossings < 2 || last == first {
        return None;
    }
    let hz = (crossings - 1) as f32 * sample_rate as f32 / (last - first) as f32;
    (MIN_PITCH_HZ..=MAX_PITCH_HZ).contains(&hz).then_some(hz)
}

/// Fills `out` with a sine continuing from `phase`, returning the next phase.
pub fn sine_into(out: &mut [f32], hz: f32, sample_rate: u32, amplitude: f32, phase: f32) -> f32 {
    let step = TAU * hz / sample_rate as f32;
    let mut phase = phase;
    for sample in out.iter_mut() {
        *sample = amplitude * phase.sin();
        phase = (phase + step) % TAU;
    }
    phase
}
