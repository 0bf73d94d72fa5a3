//! Landmark detector interface.
//!
//! The landmark model itself lives outside this workspace. The engine is
//! handed a detector at construction and drives its lifecycle explicitly:
//! `init` once, `detect` per frame, `dispose` on teardown.

use crate::landmarks::FaceLandmarks;
use facecap_frame::Frame;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model failed to load: {0}")]
    LoadFailed(String),
    #[error("detector used before init")]
    NotInitialized,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A facial landmark detector for a single face.
///
/// `detect` returns `Ok(None)` when no face is present. Callers treat an
/// `Err` the same way; it is never fatal to a capture session.
pub trait LandmarkDetector: Send {
    fn init(&mut self) -> Result<(), DetectorError> {
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError>;

    fn dispose(&mut self) {}
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn init(&mut self) -> Result<(), DetectorError> {
        (**self).init()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
        (**self).detect(frame)
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }
}

#[derive(Debug, Default)]
struct ManualState {
    face: Option<FaceLandmarks>,
    fail_next: Option<String>,
    fail_init: Option<String>,
    initialized: bool,
    disposed: bool,
    calls: u64,
}

/// Detector whose output is set from the outside.
///
/// Used for replaying recorded landmark streams, the CLI simulator, and
/// tests. Every frame gets whatever face the handle last set.
#[derive(Debug, Clone, Default)]
pub struct ManualDetector {
    state: Arc<Mutex<ManualState>>,
}

/// Control side of a [`ManualDetector`].
#[derive(Debug, Clone)]
pub struct ManualDetectorHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualDetector {
    pub fn new() -> (Self, ManualDetectorHandle) {
        let detector = Self::default();
        let handle = ManualDetectorHandle {
            state: Arc::clone(&detector.state),
        };
        (detector, handle)
    }
}

impl LandmarkDetector for ManualDetector {
    fn init(&mut self) -> Result<(), DetectorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DetectorError::LoadFailed("state poisoned".into()))?;
        if let Some(reason) = state.fail_init.take() {
            return Err(DetectorError::LoadFailed(reason));
        }
        state.initialized = true;
        state.disposed = false;
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("state poisoned".into()))?;
        if !state.initialized {
            return Err(DetectorError::NotInitialized);
        }
        state.calls += 1;
        if let Some(reason) = state.fail_next.take() {
            return Err(DetectorError::InferenceFailed(reason));
        }
        Ok(state.face.clone())
    }

    fn dispose(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.initialized = false;
            state.disposed = true;
        }
    }
}

impl ManualDetectorHandle {
    /// Face reported for every subsequent frame (`None` = nobody there).
    pub fn set_face(&self, face: Option<FaceLandmarks>) {
        if let Ok(mut state) = self.state.lock() {
            state.face = face;
        }
    }

    /// Make the next `detect` call fail once.
    pub fn fail_next(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = Some(reason.into());
        }
    }

    /// Make the next `init` call fail.
    pub fn fail_init(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_init = Some(reason.into());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().map(|s| s.disposed).unwrap_or(false)
    }

    pub fn detect_calls(&self) -> u64 {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }
}
