pub mod buffer;
pub mod dsp;
pub mod ports;
pub mod sim;

pub use buffer::{AudioBuffer, CaptureFormat};
pub use dsp::{estimate_pitch, rms};
pub use ports::{BufferSink, PlaybackPort, PortError, RecordPort};
pub use sim::{SimulatedPlayback, SimulatedRecorder};
