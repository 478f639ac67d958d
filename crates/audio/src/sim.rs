//! Clock-driven stand-ins for platform playback and capture, used by the
//! practice simulator and by tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::buffer::{AudioBuffer, CaptureFormat};
use crate::dsp::sine_into;
use crate::ports::{BufferSink, PlaybackPort, PortError, RecordPort};

pub struct SimulatedPlayback {
    duration_ms: u64,
    tick: Duration,
    rate: f32,
    source: Option<String>,
    position: Arc<watch::Sender<u64>>,
    playing: Arc<watch::Sender<bool>>,
    /// Bumped on every play and halt; a ticker only moves the position while
    /// it still owns the current run.
    run: Arc<Mutex<u64>>,
    ticker: Option<JoinHandle<()>>,
}

fn lock_run(run: &Mutex<u64>) -> MutexGuard<'_, u64> {
    run.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedPlayback {
    pub fn new(duration_ms: u64) -> Self {
        let (position, _) = watch::channel(0);
        let (playing, _) = watch::channel(false);
        Self {
            duration_ms,
            tick: Duration::from_millis(10),
            rate: 1.0,
            source: None,
            position: Arc::new(position),
            playing: Arc::new(playing),
            run: Arc::new(Mutex::new(0)),
            ticker: None,
        }
    }

    /// Playback speed; position advances `rate` ms per wall-clock ms.
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate.max(0.01);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn halt(&mut self) {
        let mut run = lock_run(&self.run);
        *run += 1;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.playing.send_replace(false);
    }
}

#[async_trait]
impl PlaybackPort for SimulatedPlayback {
    async fn open(&mut self, source: &str) -> Result<(), PortError> {
        debug!(source, "opening simulated playback");
        self.source = Some(source.to_string());
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> Result<(), PortError> {
        if self.source.is_none() {
            return Err(PortError::Closed);
        }
        let _run = lock_run(&self.run);
        self.position.send_replace(position_ms.min(self.duration_ms));
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PortError> {
        if self.source.is_none() {
            return Err(PortError::Closed);
        }
        let mut current = lock_run(&self.run);
        // A ticker that ran to the end has already cleared `playing`.
        if *self.playing.borrow() {
            return Ok(());
        }
        *current += 1;
        let owned = *current;
        if let Some(stale) = self.ticker.take() {
            stale.abort();
        }
        let position = Arc::clone(&self.position);
        let playing = Arc::clone(&self.playing);
        let run = Arc::clone(&self.run);
        let step = (self.tick.as_millis() as f32 * self.rate).round().max(1.0) as u64;
        let tick = self.tick;
        let duration_ms = self.duration_ms;
        if *position.borrow() >= duration_ms {
            debug!(duration_ms, "play requested at end of media");
            return Ok(());
        }
        playing.send_replace(true);
        debug!(position = *position.borrow(), "simulated playback running");
        self.ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let current = lock_run(&run);
                if *current != owned {
                    break;
                }
                let next = (*position.borrow() + step).min(duration_ms);
                position.send_replace(next);
                if next >= duration_ms {
                    playing.send_replace(false);
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PortError> {
        self.halt();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PortError> {
        self.halt();
        Ok(())
    }

    fn position(&self) -> watch::Receiver<u64> {
        self.position.subscribe()
    }

    fn playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }
}

impl Drop for SimulatedPlayback {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Produces a steady tone (or silence) at the capture format's buffer rate.
pub struct SimulatedRecorder {
    format: CaptureFormat,
    tone_hz: Option<f32>,
    amplitude: f32,
    task: Option<JoinHandle<()>>,
}

impl SimulatedRecorder {
    pub fn new(format: CaptureFormat) -> Self {
        Self {
            format,
            tone_hz: None,
            amplitude: 0.3,
            task: None,
        }
    }

    pub fn with_tone(mut self, hz: f32) -> Self {
        self.tone_hz = Some(hz);
        self
    }

    pub fn is_recording(&self) -> bool {
        self.task.is_some()
    }
}

#[async_trait]
impl RecordPort for SimulatedRecorder {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    async fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PortError> {
        if self.task.is_some() {
            return Err(PortError::transport("recorder already running"));
        }
        let format = self.format;
        let tone_hz = self.tone_hz;
        let amplitude = self.amplitude;
        debug!(?format, ?tone_hz, "starting simulated recorder");
        self.task = Some(tokio::spawn(async move {
            let period = format.buffer_duration();
            let mut phase = 0.0;
            loop {
                tokio::time::sleep(period).await;
                let mut samples = vec![0.0; format.buffer_size as usize];
                if let Some(hz) = tone_hz {
                    phase = sine_into(&mut samples, hz, format.sample_rate, amplitude, phase);
                }
                sink.push(AudioBuffer::new(samples, format.sample_rate));
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PortError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for SimulatedRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
