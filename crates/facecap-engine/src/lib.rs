//! facecap-engine — Pose-gated auto-capture.
//!
//! [`pipeline::CapturePipeline`] is the synchronous core; [`spawn_engine`]
//! wraps it in a tokio task that owns the clock and the frame feed.

pub mod config;
pub mod engine;
pub mod events;
pub mod pipeline;
pub mod sequence;
pub mod timer;
pub mod upload;

pub use config::{ConfigError, EngineConfig, QualityGate, Tuning};
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineSnapshot, FrameReceiver, FrameSender};
pub use events::{EngineEvent, EngineStatus, FaultCode};
pub use pipeline::{CalibrationError, CapturePipeline};
pub use sequence::{CaptureSession, CapturedImage, CommitOutcome, CompletedSession, PoseState, SessionError};
pub use timer::{HoldEvent, HoldPhase, HoldTicket, HoldTimer, TimerSnapshot};
pub use upload::{ChannelSink, DirectorySink, UploadError, UploadSink};
