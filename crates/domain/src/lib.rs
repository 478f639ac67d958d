pub mod error;
pub mod io;
pub mod lesson;
pub mod pitch;

pub use crate::error::DomainError;
pub use crate::io::{LessonCodec, LessonFormat, SerdeLessonCodec};
pub use crate::lesson::{LessonDescriptor, PracticeMode, PracticeStatistics, Segment, SegmentModel};
pub use crate::pitch::{PitchPoint, PitchTrace};
