//! Presentation-facing handle of a practice session.
//!
//! The handle is cheap to clone and only sends messages; all state lives in
//! a single actor task (see `actor.rs`). Finish and restart advance the
//! session epoch in the caller's thread before the message is queued, so a
//! pending auto-advance or a buffer already in flight is invalidated even if
//! the actor has not caught up yet.

use std::sync::Arc;

use duet_audio::{AudioBuffer, BufferSink, PlaybackPort, RecordPort};
use duet_domain::LessonDescriptor;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::actor::SessionActor;
use crate::aggregate::{ResultMap, SessionReport};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::evaluator::Evaluator;
use crate::inbox::{AudioInbox, SessionEpoch};
use crate::observer::{SessionObserver, SnapshotStream};
use crate::session::SessionState;

/// Collaborators moved into the controller for its whole lifetime.
pub struct SessionPorts {
    pub playback: Box<dyn PlaybackPort>,
    pub recorder: Box<dyn RecordPort>,
    pub evaluator: Box<dyn Evaluator>,
}

pub(crate) type Reply = oneshot::Sender<Result<(), SessionError>>;

pub(crate) enum Command {
    Prepare { reply: Reply },
    BeginSegment { index: usize, reply: Reply },
    EndSegmentEarly { reply: Reply },
    Retry { reply: Reply },
    Next { reply: Reply },
    Previous { reply: Reply },
    Pause { reply: Reply },
    Resume { reply: Reply },
    Finish { reply: Reply },
    Restart { from: usize, reply: Reply },
    Close { reply: Reply },
    Results { reply: oneshot::Sender<ResultMap> },
    Report { reply: oneshot::Sender<SessionReport> },
}

#[derive(Clone)]
pub struct PracticeSessionController {
    commands: mpsc::UnboundedSender<Command>,
    observer: SessionObserver,
    inbox: Arc<AudioInbox>,
    epoch: SessionEpoch,
    segment_count: usize,
}

impl PracticeSessionController {
    /// Starts the session actor on the current tokio runtime. The session
    /// begins in `Idle`; call [`prepare`](Self::prepare) next.
    pub fn spawn(
        lesson: LessonDescriptor,
        config: SessionConfig,
        ports: SessionPorts,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let observer = SessionObserver::new(SessionState::new());
        let inbox = Arc::new(AudioInbox::new(config.audio_queue_capacity));
        let epoch = SessionEpoch::default();
        let segment_count = lesson.segments.len();
        info!(lesson = %lesson.id, segment_count, "spawning practice session");
        let actor = SessionActor::new(
            lesson,
            config,
            ports,
            command_rx,
            observer.clone(),
            Arc::clone(&inbox),
            epoch.clone(),
        );
        tokio::spawn(actor.run());
        Ok(Self {
            commands,
            observer,
            inbox,
            epoch,
            segment_count,
        })
    }

    pub async fn prepare(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Prepare { reply }).await
    }

    pub async fn begin_segment(&self, index: usize) -> Result<(), SessionError> {
        self.request(|reply| Command::BeginSegment { index, reply })
            .await
    }

    pub async fn end_segment_early(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::EndSegmentEarly { reply })
            .await
    }

    pub async fn retry_current_segment(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Retry { reply }).await
    }

    pub async fn next_segment(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Next { reply }).await
    }

    pub async fn previous_segment(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Previous { reply }).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn finish_session(&self) -> Result<(), SessionError> {
        self.epoch.advance();
        self.request(|reply| Command::Finish { reply }).await
    }

    pub async fn restart_session(&self, from: usize) -> Result<(), SessionError> {
        if from < self.segment_count {
            self.epoch.advance();
        }
        self.request(|reply| Command::Restart { from, reply })
            .await
    }

    /// Stops the actor, releasing both ports. Dropping every handle has the
    /// same effect.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.epoch.advance();
        self.request(|reply| Command::Close { reply }).await
    }

    /// Non-blocking hand-off of a captured buffer; safe to call from an
    /// audio callback.
    pub fn add_audio(&self, buffer: AudioBuffer) {
        self.inbox.push(self.epoch.current(), buffer);
    }

    /// Sink for platform capture code that pushes outside a `RecordPort`.
    /// Buffers are tagged with the epoch current at push time.
    pub fn audio_sink(&self) -> Arc<dyn BufferSink> {
        Arc::new(HandleSink {
            inbox: Arc::clone(&self.inbox),
            epoch: self.epoch.clone(),
        })
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.observer.subscribe()
    }

    pub fn latest(&self) -> SessionState {
        self.observer.latest()
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn dropped_buffers(&self) -> u64 {
        self.inbox.dropped()
    }

    pub async fn results(&self) -> Result<ResultMap, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Results { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn report(&self) -> Result<SessionReport, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Report { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn request<F>(&self, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(Reply) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed)
    }
}

struct HandleSink {
    inbox: Arc<AudioInbox>,
    epoch: SessionEpoch,
}

impl BufferSink for HandleSink {
    fn push(&self, buffer: AudioBuffer) {
        self.inbox.push(self.epoch.current(), buffer);
    }
}
