//! Hand-driven ports and a scripted evaluator for controller tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duet_audio::{AudioBuffer, BufferSink, CaptureFormat, PlaybackPort, PortError, RecordPort};
use duet_domain::{LessonDescriptor, PitchTrace, PracticeMode, Segment};
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::controller::{PracticeSessionController, SessionPorts};
use crate::error::EvaluatorError;
use crate::evaluator::{AttemptHandle, Evaluator, PartialEvaluation};
use crate::observer::SnapshotStream;
use crate::session::{SegmentResult, SessionState};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

pub(crate) struct FakePlayback {
    log: Log,
    position: Arc<watch::Sender<u64>>,
    playing: Arc<watch::Sender<bool>>,
    fail_open: Arc<Mutex<bool>>,
}

#[async_trait]
impl PlaybackPort for FakePlayback {
    async fn open(&mut self, source: &str) -> Result<(), PortError> {
        record(&self.log, format!("open:{source}"));
        if *self.fail_open.lock().unwrap() {
            return Err(PortError::Open(source.to_string()));
        }
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> Result<(), PortError> {
        record(&self.log, format!("seek:{position_ms}"));
        self.position.send_replace(position_ms);
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PortError> {
        record(&self.log, "play");
        self.playing.send_replace(true);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PortError> {
        record(&self.log, "pause");
        self.playing.send_replace(false);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PortError> {
        record(&self.log, "stop");
        self.playing.send_replace(false);
        Ok(())
    }

    fn position(&self) -> watch::Receiver<u64> {
        self.position.subscribe()
    }

    fn playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }
}

/// Test-side control over the fake playback engine.
#[derive(Clone)]
pub(crate) struct PlaybackDriver {
    position: Arc<watch::Sender<u64>>,
    playing: Arc<watch::Sender<bool>>,
    fail_open: Arc<Mutex<bool>>,
}

impl PlaybackDriver {
    pub(crate) fn set_position(&self, position_ms: u64) {
        self.position.send_replace(position_ms);
    }

    /// Playback ran out of audio on its own.
    pub(crate) fn run_out(&self) {
        self.playing.send_replace(false);
    }

    pub(crate) fn fail_open(&self, fail: bool) {
        *self.fail_open.lock().unwrap() = fail;
    }
}

pub(crate) struct FakeRecorder {
    log: Log,
    sink: Arc<Mutex<Option<Arc<dyn BufferSink>>>>,
    fail_start: bool,
}

#[async_trait]
impl RecordPort for FakeRecorder {
    fn format(&self) -> CaptureFormat {
        CaptureFormat::default()
    }

    async fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PortError> {
        record(&self.log, "record:start");
        if self.fail_start {
            return Err(PortError::Open("microphone".into()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PortError> {
        record(&self.log, "record:stop");
        Ok(())
    }
}

/// Pushes through the last sink the recorder was started with, even after
/// it was stopped, like a late audio callback would.
#[derive(Clone)]
pub(crate) struct RecorderDriver {
    sink: Arc<Mutex<Option<Arc<dyn BufferSink>>>>,
}

impl RecorderDriver {
    pub(crate) fn push(&self, buffer: AudioBuffer) {
        let sink = self.sink.lock().unwrap().clone();
        sink.expect("recorder was never started").push(buffer);
    }
}

#[derive(Debug, Default)]
pub(crate) struct EvalLog {
    /// `(segment, attempt_index)` per begun attempt.
    pub(crate) began: Vec<(usize, u32)>,
    pub(crate) fed: usize,
    pub(crate) discarded: usize,
    pub(crate) finalized: usize,
}

pub(crate) struct ScriptedEvaluator {
    log: Arc<Mutex<EvalLog>>,
    scores: VecDeque<Result<f32, EvaluatorError>>,
    next: u64,
    open: Option<(AttemptHandle, usize, u32)>,
}

impl Evaluator for ScriptedEvaluator {
    fn begin_attempt(
        &mut self,
        segment: &Segment,
        _mode: PracticeMode,
        attempt_index: u32,
    ) -> Result<AttemptHandle, EvaluatorError> {
        self.log
            .lock()
            .unwrap()
            .began
            .push((segment.index, attempt_index));
        let handle = AttemptHandle(self.next);
        self.next += 1;
        self.open = Some((handle, segment.index, attempt_index));
        Ok(handle)
    }

    fn feed(
        &mut self,
        handle: AttemptHandle,
        _buffer: &AudioBuffer,
    ) -> Result<Option<PartialEvaluation>, EvaluatorError> {
        match self.open {
            Some((open, ..)) if open == handle => {
                self.log.lock().unwrap().fed += 1;
                Ok(Some(PartialEvaluation {
                    pitch_hz: Some(220.0),
                }))
            }
            _ => Err(EvaluatorError::UnknownAttempt(handle.0)),
        }
    }

    fn finalize(&mut self, handle: AttemptHandle) -> Result<SegmentResult, EvaluatorError> {
        let (_, segment_index, attempt_index) = self
            .open
            .take()
            .filter(|(open, ..)| *open == handle)
            .ok_or(EvaluatorError::UnknownAttempt(handle.0))?;
        self.log.lock().unwrap().finalized += 1;
        let score = self.scores.pop_front().unwrap_or(Ok(0.8))?;
        Ok(SegmentResult {
            segment_index,
            attempt_index,
            score,
            reference_pitch_trace: PitchTrace::empty(),
            student_pitch_trace: PitchTrace::empty(),
        })
    }

    fn discard(&mut self, handle: AttemptHandle) {
        if matches!(self.open, Some((open, ..)) if open == handle) {
            self.open = None;
            self.log.lock().unwrap().discarded += 1;
        }
    }
}

/// Two-second segments back to back. In call-and-response lessons each
/// segment is a two-second teacher call followed by a two-second answer.
pub(crate) fn lesson(mode: PracticeMode, count: usize) -> LessonDescriptor {
    let segments = (0..count)
        .map(|i| match mode {
            PracticeMode::Singalong => {
                let start = i as f64 * 2.0;
                Segment::new(i, start, start + 2.0, format!("line {i}"))
            }
            PracticeMode::Singafter => {
                let start = i as f64 * 4.0;
                Segment::new(i, start, start + 2.0, format!("call {i}"))
                    .with_student_range(start + 2.0, start + 4.0)
            }
        })
        .collect();
    LessonDescriptor::new("lesson-1", "Scales", mode, "reference.wav", segments)
}

pub(crate) fn config(auto_advance: bool) -> SessionConfig {
    SessionConfig {
        auto_advance,
        progress_throttle_ms: 0,
        ..SessionConfig::default()
    }
}

pub(crate) struct Harness {
    pub(crate) controller: PracticeSessionController,
    pub(crate) playback: PlaybackDriver,
    pub(crate) recorder: RecorderDriver,
    pub(crate) eval: Arc<Mutex<EvalLog>>,
    pub(crate) log: Log,
    pub(crate) stream: SnapshotStream,
}

pub(crate) struct HarnessBuilder {
    lesson: LessonDescriptor,
    config: SessionConfig,
    scores: Vec<Result<f32, EvaluatorError>>,
    fail_record: bool,
    fail_open: bool,
}

impl HarnessBuilder {
    pub(crate) fn new(lesson: LessonDescriptor, config: SessionConfig) -> Self {
        Self {
            lesson,
            config,
            scores: Vec::new(),
            fail_record: false,
            fail_open: false,
        }
    }

    pub(crate) fn scores(mut self, scores: Vec<Result<f32, EvaluatorError>>) -> Self {
        self.scores = scores;
        self
    }

    pub(crate) fn fail_record(mut self) -> Self {
        self.fail_record = true;
        self
    }

    pub(crate) fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn spawn(self) -> Harness {
        let log: Log = Arc::default();
        let (position, _) = watch::channel(0);
        let (playing, _) = watch::channel(false);
        let playback = PlaybackDriver {
            position: Arc::new(position),
            playing: Arc::new(playing),
            fail_open: Arc::new(Mutex::new(self.fail_open)),
        };
        let sink = Arc::new(Mutex::new(None));
        let eval = Arc::new(Mutex::new(EvalLog::default()));
        let ports = SessionPorts {
            playback: Box::new(FakePlayback {
                log: Arc::clone(&log),
                position: Arc::clone(&playback.position),
                playing: Arc::clone(&playback.playing),
                fail_open: Arc::clone(&playback.fail_open),
            }),
            recorder: Box::new(FakeRecorder {
                log: Arc::clone(&log),
                sink: Arc::clone(&sink),
                fail_start: self.fail_record,
            }),
            evaluator: Box::new(ScriptedEvaluator {
                log: Arc::clone(&eval),
                scores: self.scores.into(),
                next: 0,
                open: None,
            }),
        };
        let controller = PracticeSessionController::spawn(self.lesson, self.config, ports)
            .expect("valid config");
        let stream = controller.subscribe();
        Harness {
            controller,
            playback,
            recorder: RecorderDriver { sink },
            eval,
            log,
            stream,
        }
    }
}

impl Harness {
    /// Next snapshot matching `predicate`, failing the test after a
    /// generous virtual timeout.
    pub(crate) async fn wait_for<F>(&mut self, predicate: F) -> SessionState
    where
        F: FnMut(&SessionState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), self.stream.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("snapshot stream ended")
    }

    /// Drains everything published so far.
    pub(crate) fn drain(&mut self) -> Vec<SessionState> {
        std::iter::from_fn(|| self.stream.try_next()).collect()
    }

    /// Lets the actor run until it is idle.
    pub(crate) async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| e.as_str() == entry).count()
    }

    pub(crate) fn fed(&self) -> usize {
        self.eval.lock().unwrap().fed
    }

    pub(crate) fn tone(&self) -> AudioBuffer {
        AudioBuffer::new(vec![0.25; 160], 16_000)
    }
}
