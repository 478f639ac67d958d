use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per delivered buffer.
    pub buffer_size: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            buffer_size: 1_024,
        }
    }
}

impl CaptureFormat {
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// One block of mono microphone samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_16k_mono() {
        let format = CaptureFormat::default();
        assert_eq!(format.sample_rate, 16_000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.buffer_duration(), Duration::from_millis(64));
    }

    #[test]
    fn buffer_duration() {
        let buffer = AudioBuffer::silence(8_000, 16_000);
        assert!((buffer.duration_seconds() - 0.5).abs() < 1e-9);
        assert!(!buffer.is_empty());
    }
}
