//! Events broadcast to presentation collaborators (overlay, sound, haptics).
//!
//! Receivers only observe; nothing they do feeds back into the engine.

use crate::timer::HoldTicket;
use facecap_core::{Guidance, PoseId, QualityReading};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Irrecoverable conditions surfaced to the host instead of panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    CameraPermissionDenied,
    DetectorUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "fault")]
pub enum EngineStatus {
    Starting,
    Ready,
    Complete,
    Fault(FaultCode),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Status {
        status: EngineStatus,
    },
    Quality {
        reading: QualityReading,
    },
    /// Emitted whenever correctness, transition or guidance changes.
    PoseState {
        pose_id: Option<PoseId>,
        index: usize,
        is_correct: bool,
        is_transitioning: bool,
        guidance: Guidance,
        message: String,
    },
    HoldStarted {
        pose_id: PoseId,
        ticket: HoldTicket,
    },
    Progress {
        pose_id: PoseId,
        progress: f32,
    },
    /// Halfway through a hold; the candidate frame has been taken.
    Capture {
        pose_id: PoseId,
        ticket: HoldTicket,
    },
    Commit {
        pose_id: PoseId,
        index: usize,
        width: u32,
        height: u32,
        cropped: bool,
    },
    Cancelled {
        pose_id: PoseId,
        ticket: HoldTicket,
    },
    Retake {
        pose_id: PoseId,
        index: usize,
    },
    Reset,
    Calibrated {
        pose_id: PoseId,
    },
    Complete {
        session_id: Uuid,
        images: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = EngineEvent::Commit {
            pose_id: PoseId::from("front"),
            index: 0,
            width: 96,
            height: 76,
            cropped: true,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "commit");
        assert_eq!(json["pose_id"], "front");

        let status = EngineEvent::Status {
            status: EngineStatus::Fault(FaultCode::DetectorUnavailable),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"]["state"], "fault");
        assert_eq!(json["status"]["fault"], "detector_unavailable");
    }
}
