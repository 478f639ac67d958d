mod actor;
pub mod aggregate;
pub mod analytics;
pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
mod inbox;
pub mod observer;
pub mod session;

#[cfg(test)]
mod fakes;

pub use aggregate::{AggregatedScore, ResultAggregator, ResultMap, SessionReport};
pub use analytics::SessionAnalytics;
pub use config::{Aggregation, SessionConfig};
pub use controller::{PracticeSessionController, SessionPorts};
pub use error::{ErrorKind, EvaluatorError, ReportedError, SessionError};
pub use evaluator::{AttemptHandle, ContourEvaluator, Evaluator, PartialEvaluation};
pub use observer::{SessionObserver, SnapshotStream};
pub use session::{Phase, SegmentResult, SessionState};
