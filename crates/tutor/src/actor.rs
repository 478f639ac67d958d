//! The single writer of session state.
//!
//! Control messages, captured buffers, play-position updates and
//! auto-advance timers are all consumed by one task, so transitions apply
//! strictly one at a time and snapshots go out in the order they happened.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use duet_audio::{BufferSink, PortError};
use duet_domain::{LessonDescriptor, PracticeMode, Segment, SegmentModel};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregate::{ResultAggregator, ResultMap};
use crate::config::SessionConfig;
use crate::controller::{Command, Reply, SessionPorts};
use crate::error::{ReportedError, SessionError};
use crate::evaluator::{AttemptHandle, Evaluator};
use crate::inbox::{AttemptSink, AudioInbox, SessionEpoch};
use crate::observer::{ProgressThrottle, SessionObserver};
use crate::session::{Phase, SessionState};

enum Stage {
    /// Teacher range is playing; nothing is captured yet.
    Listening,
    Capturing {
        handle: AttemptHandle,
        attempt_index: u32,
    },
}

struct Attempt {
    segment: Segment,
    epoch: u64,
    stage: Stage,
    window_ms: (u64, u64),
    /// A play position inside the window was seen since the last seek.
    armed: bool,
    /// Playback was seen running since the last seek.
    heard_playing: bool,
}

impl Attempt {
    fn contains(&self, position_ms: u64) -> bool {
        position_ms >= self.window_ms.0 && position_ms < self.window_ms.1
    }

    fn is_capturing(&self) -> bool {
        matches!(self.stage, Stage::Capturing { .. })
    }
}

fn to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

fn invalid(operation: &'static str, phase: &Phase) -> SessionError {
    SessionError::InvalidTransition {
        operation,
        phase: phase.clone(),
    }
}

pub(crate) struct SessionActor {
    lesson: LessonDescriptor,
    config: SessionConfig,
    model: Option<SegmentModel>,
    playback: Box<dyn duet_audio::PlaybackPort>,
    recorder: Box<dyn duet_audio::RecordPort>,
    evaluator: Box<dyn Evaluator>,
    position: watch::Receiver<u64>,
    playing: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<Command>,
    advance_tx: mpsc::UnboundedSender<u64>,
    advance_rx: mpsc::UnboundedReceiver<u64>,
    inbox: Arc<AudioInbox>,
    epoch: SessionEpoch,
    observer: SessionObserver,
    throttle: ProgressThrottle,
    state: SessionState,
    results: ResultMap,
    /// Retries consumed per segment since the last restart.
    retries: BTreeMap<usize, u32>,
    /// Segments begun at least once since the last restart.
    begun: BTreeSet<usize>,
    attempt: Option<Attempt>,
    pending_advance: Option<JoinHandle<()>>,
    playback_open: bool,
    recording: bool,
}

impl SessionActor {
    pub(crate) fn new(
        lesson: LessonDescriptor,
        config: SessionConfig,
        ports: SessionPorts,
        commands: mpsc::UnboundedReceiver<Command>,
        observer: SessionObserver,
        inbox: Arc<AudioInbox>,
        epoch: SessionEpoch,
    ) -> Self {
        let position = ports.playback.position();
        let playing = ports.playback.playing();
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();
        let throttle = ProgressThrottle::new(config.progress_throttle());
        Self {
            lesson,
            config,
            model: None,
            playback: ports.playback,
            recorder: ports.recorder,
            evaluator: ports.evaluator,
            position,
            playing,
            commands,
            advance_tx,
            advance_rx,
            inbox,
            epoch,
            observer,
            throttle,
            state: SessionState::new(),
            results: ResultMap::new(),
            retries: BTreeMap::new(),
            begun: BTreeSet::new(),
            attempt: None,
            pending_advance: None,
            playback_open: false,
            recording: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let tracking = self.tracking();
            tokio::select! {
                biased;
                _ = self.inbox.notified() => {
                    let outcome = self.drain_audio().await;
                    self.settle(outcome);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(epoch) = self.advance_rx.recv() => {
                    let outcome = self.on_advance_timer(epoch).await;
                    self.settle(outcome);
                }
                changed = self.position.changed(), if tracking => {
                    let outcome = match changed {
                        Ok(()) => self.on_position().await,
                        Err(_) => Err(self.enter_error(PortError::Closed).await),
                    };
                    self.settle(outcome);
                }
                changed = self.playing.changed(), if tracking => {
                    let outcome = match changed {
                        Ok(()) => self.on_playing().await,
                        Err(_) => Err(self.enter_error(PortError::Closed).await),
                    };
                    self.settle(outcome);
                }
            }
        }
        debug!(lesson = %self.lesson.id, "practice session actor stopped");
    }

    /// Returns `false` once the actor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Prepare { reply } => {
                let outcome = self.prepare().await;
                self.respond(reply, outcome);
            }
            Command::BeginSegment { index, reply } => {
                let outcome = self.begin_segment(index, "begin_segment", None).await;
                self.respond(reply, outcome);
            }
            Command::EndSegmentEarly { reply } => {
                let outcome = if self.state.phase == Phase::Practicing {
                    self.end_window(false).await
                } else {
                    Err(invalid("end_segment_early", &self.state.phase))
                };
                self.respond(reply, outcome);
            }
            Command::Retry { reply } => {
                let outcome = self.retry().await;
                self.respond(reply, outcome);
            }
            Command::Next { reply } => {
                let outcome = self.navigate(true).await;
                self.respond(reply, outcome);
            }
            Command::Previous { reply } => {
                let outcome = self.navigate(false).await;
                self.respond(reply, outcome);
            }
            Command::Pause { reply } => {
                let outcome = self.pause().await;
                self.respond(reply, outcome);
            }
            Command::Resume { reply } => {
                let outcome = self.resume().await;
                self.respond(reply, outcome);
            }
            Command::Finish { reply } => {
                let outcome = self.finish().await;
                self.respond(reply, outcome);
            }
            Command::Restart { from, reply } => {
                let outcome = self.restart(from).await;
                self.respond(reply, outcome);
            }
            Command::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
                return false;
            }
            Command::Results { reply } => {
                let _ = reply.send(self.results.clone());
            }
            Command::Report { reply } => {
                let report = ResultAggregator::from_config(&self.config).report(&self.results);
                let _ = reply.send(report);
            }
        }
        true
    }

    fn respond(&mut self, reply: Reply, outcome: Result<(), SessionError>) {
        if let Err(err) = &outcome {
            self.surface(err);
        }
        let _ = reply.send(outcome);
    }

    fn settle(&mut self, outcome: Result<(), SessionError>) {
        if let Err(err) = outcome {
            self.surface(&err);
        }
    }

    /// Publishes a rejected request. Port failures were already published
    /// with the `Error` phase.
    fn surface(&mut self, err: &SessionError) {
        if err.is_fatal() {
            return;
        }
        debug!(%err, "request rejected");
        self.state.last_error = Some(ReportedError::from(err));
        self.publish();
    }

    fn model(&self, operation: &'static str) -> Result<&SegmentModel, SessionError> {
        self.model
            .as_ref()
            .ok_or_else(|| invalid(operation, &self.state.phase))
    }

    fn tracking(&self) -> bool {
        self.attempt.is_some() && self.state.phase.is_active() && !self.state.paused
    }

    #[instrument(skip(self), fields(lesson = %self.lesson.id))]
    async fn prepare(&mut self) -> Result<(), SessionError> {
        if self.state.phase != Phase::Idle {
            return Err(invalid("prepare", &self.state.phase));
        }
        let model = self
            .lesson
            .segment_model()
            .map_err(|err| SessionError::InvalidLesson(err.to_string()))?;
        let segments = model.len();
        self.model = Some(model);
        self.transition(Phase::Loading);
        self.open_playback().await?;
        self.state.active_segment_index = 0;
        self.transition(Phase::Ready);
        info!(segments, "lesson ready");
        Ok(())
    }

    async fn open_playback(&mut self) -> Result<(), SessionError> {
        match self.playback.open(&self.lesson.reference_audio).await {
            Ok(()) => {
                self.playback_open = true;
                Ok(())
            }
            Err(err) => Err(self.enter_error(err).await),
        }
    }

    #[instrument(skip(self))]
    async fn begin_segment(
        &mut self,
        index: usize,
        operation: &'static str,
        scheduled: Option<u64>,
    ) -> Result<(), SessionError> {
        let count = self.model(operation)?.len();
        match self.state.phase {
            Phase::Ready | Phase::SegmentComplete | Phase::Listening | Phase::Practicing => {}
            ref phase => return Err(invalid(operation, phase)),
        }
        if index >= count {
            return Err(SessionError::OutOfRange {
                index: index as isize,
                count,
            });
        }
        // Going back to a segment already begun spends one of its retries.
        let retry = self.begun.contains(&index);
        if retry {
            self.check_retries(index)?;
        }
        self.start_attempt(index, retry, scheduled).await
    }

    fn check_retries(&self, index: usize) -> Result<(), SessionError> {
        if self.retries.get(&index).copied().unwrap_or(0) >= self.config.max_attempts {
            return Err(SessionError::AttemptsExhausted {
                segment: index,
                max_attempts: self.config.max_attempts,
            });
        }
        Ok(())
    }

    fn charge_retry(&mut self, index: usize) {
        let used = self.retries.entry(index).or_default();
        *used = used.saturating_add(1);
        if index == self.state.active_segment_index {
            self.state.attempt_count = *used;
        }
    }

    /// Starts a fresh attempt on `index`. A `scheduled` epoch makes the start
    /// conditional on nothing having invalidated it since it was scheduled.
    async fn start_attempt(
        &mut self,
        index: usize,
        retry: bool,
        scheduled: Option<u64>,
    ) -> Result<(), SessionError> {
        let epoch = match scheduled {
            Some(expected) => match self.epoch.advance_from(expected) {
                Some(epoch) => epoch,
                None => {
                    debug!(expected, current = self.epoch.current(), "scheduled start superseded");
                    return Ok(());
                }
            },
            None => self.epoch.advance(),
        };
        self.flush_progress();
        if self.attempt.is_some() {
            self.abort_attempt().await;
        }
        self.cancel_advance();
        let model = self.model("begin_segment")?.clone();
        let segment = model
            .get(index)
            .cloned()
            .ok_or(SessionError::OutOfRange {
                index: index as isize,
                count: model.len(),
            })?;
        self.state.active_segment_index = index;
        if retry {
            self.charge_retry(index);
        }
        self.begun.insert(index);
        self.state.attempt_count = self.retries.get(&index).copied().unwrap_or(0);
        self.state.reset_progress();
        self.throttle.reset();

        let (start, end) = segment.teacher_range();
        let window_ms = (to_ms(start), to_ms(end));
        self.attempt = Some(Attempt {
            segment,
            epoch,
            stage: Stage::Listening,
            window_ms,
            armed: false,
            heard_playing: false,
        });
        if let Err(err) = self.seek_and_play(window_ms.0).await {
            return Err(self.enter_error(err).await);
        }
        match model.mode() {
            PracticeMode::Singalong => self.open_capture().await,
            PracticeMode::Singafter => {
                info!(segment = index, "listening to teacher range");
                self.transition(Phase::Listening);
                Ok(())
            }
        }
    }

    async fn seek_and_play(&mut self, position_ms: u64) -> Result<(), PortError> {
        self.playback.seek(position_ms).await?;
        self.playback.play().await?;
        let position = *self.position.borrow_and_update();
        let playing = *self.playing.borrow_and_update();
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.armed = attempt.contains(position);
            attempt.heard_playing = playing;
        }
        Ok(())
    }

    /// Opens the capture window of the current attempt: seeks to the student
    /// range in call-and-response mode, begins the evaluator attempt and
    /// starts the recorder.
    async fn open_capture(&mut self) -> Result<(), SessionError> {
        let mode = self.model("begin_segment")?.mode();
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(());
        };
        let segment = attempt.segment.clone();
        let epoch = attempt.epoch;
        let (start, end) = segment.capture_range(mode);
        let window_ms = (to_ms(start), to_ms(end));
        attempt.window_ms = window_ms;

        if mode == PracticeMode::Singafter {
            if let Err(err) = self.seek_and_play(window_ms.0).await {
                return Err(self.enter_error(err).await);
            }
        }

        let attempt_index = self.results.get(&segment.index).map_or(0, Vec::len) as u32;
        let handle = match self.evaluator.begin_attempt(&segment, mode, attempt_index) {
            Ok(handle) => handle,
            Err(err) => return self.fail_attempt(SessionError::from(err)).await,
        };
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.stage = Stage::Capturing {
                handle,
                attempt_index,
            };
        }

        let sink: Arc<dyn BufferSink> = Arc::new(AttemptSink::new(Arc::clone(&self.inbox), epoch));
        if let Err(err) = self.recorder.start(sink).await {
            return Err(self.enter_error(err).await);
        }
        self.recording = true;
        info!(
            segment = segment.index,
            attempt = attempt_index,
            window_start_ms = window_ms.0,
            window_end_ms = window_ms.1,
            "capture open"
        );
        self.transition(Phase::Practicing);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn end_window(&mut self, elapsed: bool) -> Result<(), SessionError> {
        let Some(attempt) = self.attempt.take() else {
            return Ok(());
        };
        let (handle, attempt_index) = match attempt.stage {
            Stage::Capturing {
                handle,
                attempt_index,
            } => (handle, attempt_index),
            Stage::Listening => {
                self.attempt = Some(attempt);
                return Ok(());
            }
        };
        if elapsed {
            self.state.segment_progress = 1.0;
            self.throttle.reset();
            self.publish();
        }
        if let Err(err) = self.stop_recorder().await {
            self.evaluator.discard(handle);
            return Err(self.enter_error(err).await);
        }
        if let Err(err) = self.playback.pause().await {
            self.evaluator.discard(handle);
            return Err(self.enter_error(err).await);
        }

        let segment_index = attempt.segment.index;
        match self.score_attempt(segment_index, handle, attempt_index) {
            Ok(score) => {
                info!(segment = segment_index, attempt = attempt_index, score, "segment complete");
                self.transition(Phase::SegmentComplete);
            }
            Err(error) => {
                warn!(%error, segment = segment_index, "attempt could not be scored");
                self.charge_retry(segment_index);
                self.transition_with(Phase::SegmentComplete, Some(ReportedError::from(&error)));
            }
        }
        self.schedule_advance();
        Ok(())
    }

    /// Finalizes an attempt whose ports are already stopped and records the
    /// result.
    fn score_attempt(
        &mut self,
        segment_index: usize,
        handle: AttemptHandle,
        attempt_index: u32,
    ) -> Result<f32, SessionError> {
        self.transition(Phase::Evaluating);
        self.state.current_pitch = 0.0;
        let mut result = self.evaluator.finalize(handle)?;
        result.segment_index = segment_index;
        result.attempt_index = attempt_index;
        result.score = if result.score.is_finite() {
            result.score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let score = result.score;
        self.results
            .entry(segment_index)
            .or_default()
            .push(result.clone());
        self.state.completed_segments.insert(segment_index);
        self.state.last_result = Some(result);
        Ok(score)
    }

    async fn fail_attempt(&mut self, error: SessionError) -> Result<(), SessionError> {
        warn!(%error, segment = self.state.active_segment_index, "attempt failed");
        self.abort_attempt().await;
        self.charge_retry(self.state.active_segment_index);
        self.state.current_pitch = 0.0;
        self.transition_with(Phase::SegmentComplete, Some(ReportedError::from(&error)));
        self.schedule_advance();
        Ok(())
    }

    async fn retry(&mut self) -> Result<(), SessionError> {
        if !matches!(
            self.state.phase,
            Phase::Listening | Phase::Practicing | Phase::SegmentComplete
        ) {
            return Err(invalid("retry_current_segment", &self.state.phase));
        }
        let index = self.state.active_segment_index;
        self.check_retries(index)?;
        debug!(segment = index, "retrying segment");
        self.start_attempt(index, true, None).await
    }

    async fn navigate(&mut self, forward: bool) -> Result<(), SessionError> {
        let operation = if forward {
            "next_segment"
        } else {
            "previous_segment"
        };
        if self.config.auto_advance {
            return Err(SessionError::ManualNavigationDisabled);
        }
        if !matches!(self.state.phase, Phase::Ready | Phase::SegmentComplete) {
            return Err(invalid(operation, &self.state.phase));
        }
        let count = self.model(operation)?.len();
        let target = self.state.active_segment_index as isize + if forward { 1 } else { -1 };
        if target < 0 || target as usize >= count {
            return Err(SessionError::OutOfRange {
                index: target,
                count,
            });
        }
        self.begin_segment(target as usize, operation, None).await
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        if !self.state.phase.is_active() {
            return Err(invalid("pause", &self.state.phase));
        }
        if self.state.paused {
            return Ok(());
        }
        if let Err(err) = self.playback.pause().await {
            return Err(self.enter_error(err).await);
        }
        self.state.paused = true;
        self.publish();
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        if !self.state.phase.is_active() {
            return Err(invalid("resume", &self.state.phase));
        }
        if !self.state.paused {
            return Ok(());
        }
        if let Err(err) = self.playback.play().await {
            return Err(self.enter_error(err).await);
        }
        // The stop reported by our own pause is not the end of the audio.
        self.playing.borrow_and_update();
        self.state.paused = false;
        self.publish();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn finish(&mut self) -> Result<(), SessionError> {
        if self.state.phase == Phase::SessionComplete {
            return Ok(());
        }
        self.flush_progress();
        self.epoch.advance();
        self.cancel_advance();
        let mut failure = None;
        if let Some(attempt) = self.attempt.take() {
            match attempt.stage {
                Stage::Capturing {
                    handle,
                    attempt_index,
                } => {
                    self.stop_recorder_quietly().await;
                    if let Err(err) = self.score_attempt(attempt.segment.index, handle, attempt_index) {
                        warn!(%err, segment = attempt.segment.index, "in-flight attempt could not be scored");
                        failure = Some(ReportedError::from(&err));
                    }
                }
                Stage::Listening => {
                    debug!(segment = attempt.segment.index, "discarding attempt that never captured");
                }
            }
        }
        self.stop_recorder_quietly().await;
        if self.playback_open {
            if let Err(err) = self.playback.stop().await {
                warn!(%err, "failed to stop playback");
            }
        }
        self.state.reset_progress();
        self.throttle.reset();
        self.transition_with(Phase::SessionComplete, failure);
        info!(completed = self.state.completed_segments.len(), "session complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restart(&mut self, from: usize) -> Result<(), SessionError> {
        if matches!(self.state.phase, Phase::Idle | Phase::Loading) {
            return Err(invalid("restart_session", &self.state.phase));
        }
        let count = self.model("restart_session")?.len();
        if from >= count {
            return Err(SessionError::OutOfRange {
                index: from as isize,
                count,
            });
        }
        self.flush_progress();
        self.epoch.advance();
        self.cancel_advance();
        self.abort_attempt().await;
        self.results.clear();
        self.retries.clear();
        self.begun.clear();
        self.state.completed_segments.clear();
        self.state.last_result = None;
        self.state.attempt_count = 0;
        self.state.active_segment_index = from;
        self.state.reset_progress();
        self.throttle.reset();
        if !self.playback_open {
            self.transition(Phase::Loading);
            self.open_playback().await?;
        }
        self.transition(Phase::Ready);
        info!(from, "session restarted");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.epoch.advance();
        self.cancel_advance();
        self.abort_attempt().await;
        if self.playback_open {
            if let Err(err) = self.playback.stop().await {
                warn!(%err, "failed to stop playback");
            }
            self.playback_open = false;
        }
        self.state.reset_progress();
        self.throttle.reset();
        self.transition(Phase::Cancelled);
        self.observer.close();
        info!(lesson = %self.lesson.id, "practice session closed");
    }

    async fn on_advance_timer(&mut self, epoch: u64) -> Result<(), SessionError> {
        self.pending_advance = None;
        if epoch != self.epoch.current() || self.state.phase != Phase::SegmentComplete {
            debug!(epoch, current = self.epoch.current(), "stale auto-advance ignored");
            return Ok(());
        }
        let index = self.state.active_segment_index;
        if self.model("auto_advance")?.is_last(index) {
            self.finish().await
        } else {
            self.begin_segment(index + 1, "auto_advance", Some(epoch)).await
        }
    }

    async fn on_position(&mut self) -> Result<(), SessionError> {
        let position = *self.position.borrow_and_update();
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(());
        };
        let (start, end) = attempt.window_ms;
        if !attempt.armed {
            if !attempt.contains(position) {
                debug!(position, start, end, "ignoring position outside the window");
                return Ok(());
            }
            attempt.armed = true;
        }
        let capturing = attempt.is_capturing();
        if position >= end {
            return if capturing {
                self.end_window(true).await
            } else {
                self.open_capture().await
            };
        }
        if capturing {
            let span = end.saturating_sub(start).max(1) as f32;
            self.state.segment_progress =
                (position.saturating_sub(start) as f32 / span).clamp(0.0, 1.0);
            self.publish_progress();
        }
        Ok(())
    }

    async fn on_playing(&mut self) -> Result<(), SessionError> {
        let playing = *self.playing.borrow_and_update();
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(());
        };
        if playing {
            attempt.heard_playing = true;
            return Ok(());
        }
        if !attempt.heard_playing {
            return Ok(());
        }
        debug!(segment = attempt.segment.index, "reference playback stopped inside the window");
        if attempt.is_capturing() {
            self.end_window(true).await
        } else {
            self.open_capture().await
        }
    }

    async fn drain_audio(&mut self) -> Result<(), SessionError> {
        let current = self.epoch.current();
        let mut updated = false;
        for tagged in self.inbox.drain() {
            let handle = match &self.attempt {
                Some(Attempt {
                    stage: Stage::Capturing { handle, .. },
                    epoch,
                    ..
                }) if *epoch == current
                    && tagged.epoch == current
                    && self.state.phase == Phase::Practicing
                    && !self.state.paused =>
                {
                    *handle
                }
                _ => {
                    debug!(buffer_epoch = tagged.epoch, current, "dropping buffer outside capture");
                    continue;
                }
            };
            match self.evaluator.feed(handle, &tagged.buffer) {
                Ok(Some(partial)) => {
                    self.state.current_pitch = partial.pitch_hz.unwrap_or(0.0);
                    updated = true;
                }
                Ok(None) => {}
                Err(err) => return self.fail_attempt(SessionError::from(err)).await,
            }
        }
        if updated {
            self.publish_progress();
        }
        Ok(())
    }

    async fn abort_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            if let Stage::Capturing { handle, .. } = attempt.stage {
                self.evaluator.discard(handle);
            }
            debug!(segment = attempt.segment.index, "discarded in-flight attempt");
        }
        self.stop_recorder_quietly().await;
        if self.playback_open {
            if let Err(err) = self.playback.pause().await {
                warn!(%err, "failed to pause playback");
            }
        }
    }

    async fn enter_error(&mut self, cause: PortError) -> SessionError {
        let error = SessionError::Port(cause);
        error!(%error, "port failure, session halted");
        self.epoch.advance();
        self.cancel_advance();
        self.abort_attempt().await;
        if self.playback_open {
            if let Err(err) = self.playback.stop().await {
                warn!(%err, "failed to stop playback");
            }
        }
        self.playback_open = false;
        self.state.reset_progress();
        self.throttle.reset();
        self.transition_with(
            Phase::Error(error.to_string()),
            Some(ReportedError::from(&error)),
        );
        error
    }

    async fn stop_recorder(&mut self) -> Result<(), PortError> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;
        self.recorder.stop().await
    }

    async fn stop_recorder_quietly(&mut self) {
        if let Err(err) = self.stop_recorder().await {
            warn!(%err, "failed to stop recorder");
        }
    }

    fn schedule_advance(&mut self) {
        if !self.config.auto_advance {
            return;
        }
        self.cancel_advance();
        let epoch = self.epoch.current();
        let delay = self.config.settle_delay();
        let tx = self.advance_tx.clone();
        debug!(epoch, ?delay, "auto-advance scheduled");
        self.pending_advance = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(epoch);
        }));
    }

    fn cancel_advance(&mut self) {
        if let Some(task) = self.pending_advance.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        self.observer.publish(&self.state);
    }

    fn publish_progress(&mut self) {
        if self.throttle.admit() {
            self.publish();
        }
    }

    fn flush_progress(&mut self) {
        if self.throttle.take_pending() {
            self.publish();
        }
    }

    fn transition(&mut self, phase: Phase) {
        self.transition_with(phase, None);
    }

    fn transition_with(&mut self, phase: Phase, error: Option<ReportedError>) {
        self.flush_progress();
        debug!(from = ?self.state.phase, to = ?phase, "phase transition");
        self.state.phase = phase;
        self.state.last_error = error;
        self.publish();
    }
}
