//! Capture session: which pose is active, what has been captured so far.
//!
//! Captures always form a contiguous prefix of the pose list. Every
//! mutation bumps the session generation so holds started under an older
//! version can be told apart and refused.

use crate::timer::{HoldKey, HoldTicket};
use chrono::{DateTime, Utc};
use facecap_core::{PoseId, PoseSpec, PoseTemplate, StillImage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TRANSITION: Duration = Duration::from_millis(1000);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown pose id: {0}")]
    UnknownPose(PoseId),
    #[error("hold ticket {ticket:?} is stale (session at generation {generation}, pose {index})")]
    StaleHold {
        ticket: HoldTicket,
        generation: u64,
        index: usize,
    },
    #[error("session already complete")]
    AlreadyComplete,
    #[error("session incomplete: {captured} of {required} poses captured")]
    Incomplete { captured: usize, required: usize },
}

/// Committed still for one pose.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub pose_id: PoseId,
    pub image: StillImage,
    pub captured_at: DateTime<Utc>,
}

/// Per-frame status of the active pose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseState {
    /// `None` once every pose is captured.
    pub pose_id: Option<PoseId>,
    pub is_correct: bool,
    pub is_transitioning: bool,
}

/// What a successful commit did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Advanced { index: usize },
    Complete,
}

/// Ordered result handed to the upload collaborator.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub id: Uuid,
    pub images: Vec<CapturedImage>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CaptureSession {
    id: Uuid,
    generation: u64,
    template: PoseTemplate,
    index: usize,
    captured: Vec<CapturedImage>,
    transition: Duration,
    transition_until: Option<Instant>,
}

impl CaptureSession {
    pub fn new(template: PoseTemplate, transition: Duration) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            generation: 0,
            template,
            index: 0,
            captured: Vec::new(),
            transition,
            transition_until: None,
        };
        tracing::info!(session = %session.id, poses = session.template.len(), "capture session created");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Index of the active pose; equals `len()` once complete.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    pub fn poses(&self) -> &[PoseSpec] {
        &self.template.poses
    }

    pub fn current_pose(&self) -> Option<&PoseSpec> {
        self.template.poses.get(self.index)
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.template.len()
    }

    pub fn hold_key(&self) -> HoldKey {
        HoldKey {
            generation: self.generation,
            pose_index: self.index,
        }
    }

    /// Grace window length for future advances.
    pub fn set_transition(&mut self, transition: Duration) {
        self.transition = transition;
    }

    pub fn is_transitioning(&self, now: Instant) -> bool {
        self.transition_until.is_some_and(|until| now < until)
    }

    /// End of the running grace window, if any.
    pub fn transition_deadline(&self, now: Instant) -> Option<Instant> {
        self.transition_until.filter(|&until| now < until)
    }

    pub fn pose_state(&self, now: Instant, is_correct: bool) -> PoseState {
        PoseState {
            pose_id: self.current_pose().map(|p| p.id.clone()),
            is_correct,
            is_transitioning: self.is_transitioning(now),
        }
    }

    /// Captured images in pose order.
    pub fn images(&self) -> &[CapturedImage] {
        &self.captured
    }

    pub fn image(&self, pose_id: &PoseId) -> Option<&CapturedImage> {
        self.captured.iter().find(|c| &c.pose_id == pose_id)
    }

    /// Store `image` for the active pose and move on.
    ///
    /// The ticket must have been issued for the current generation and
    /// pose index; anything else is a hold that outlived a session change.
    pub fn on_pose_committed(
        &mut self,
        ticket: HoldTicket,
        image: StillImage,
        now: Instant,
    ) -> Result<CommitOutcome, SessionError> {
        if self.is_complete() {
            return Err(SessionError::AlreadyComplete);
        }
        if ticket.key() != self.hold_key() {
            return Err(SessionError::StaleHold {
                ticket,
                generation: self.generation,
                index: self.index,
            });
        }

        let pose_id = self.template.poses[self.index].id.clone();
        tracing::info!(
            session = %self.id,
            pose = %pose_id,
            index = self.index,
            width = image.width,
            height = image.height,
            "pose committed"
        );
        self.captured.push(CapturedImage {
            pose_id,
            image,
            captured_at: Utc::now(),
        });
        self.index += 1;
        self.generation += 1;

        if self.is_complete() {
            self.transition_until = None;
            tracing::info!(session = %self.id, images = self.captured.len(), "capture sequence complete");
            Ok(CommitOutcome::Complete)
        } else {
            self.transition_until = Some(now + self.transition);
            Ok(CommitOutcome::Advanced { index: self.index })
        }
    }

    /// Throw away `pose_id`'s capture and everything after it, and make it
    /// the active pose. A pose not reached yet leaves the captures alone.
    pub fn retake(&mut self, pose_id: &PoseId, now: Instant) -> Result<usize, SessionError> {
        let position = self
            .template
            .position(pose_id)
            .ok_or_else(|| SessionError::UnknownPose(pose_id.clone()))?;

        if position <= self.index {
            self.index = position;
            self.captured.truncate(position);
        }
        self.generation += 1;
        self.transition_until = Some(now + self.transition);
        tracing::info!(session = %self.id, pose = %pose_id, index = self.index, "retake");
        Ok(self.index)
    }

    /// Clear every capture and return to the first pose.
    pub fn reset(&mut self, now: Instant) {
        self.index = 0;
        self.captured.clear();
        self.generation += 1;
        self.transition_until = Some(now + self.transition);
        tracing::info!(session = %self.id, "session reset");
    }

    /// Copy of the finished session, for hand-off while keeping this one.
    pub fn completed(&self) -> Result<CompletedSession, SessionError> {
        if !self.is_complete() {
            return Err(SessionError::Incomplete {
                captured: self.captured.len(),
                required: self.template.len(),
            });
        }
        Ok(CompletedSession {
            id: self.id,
            images: self.captured.clone(),
            completed_at: Utc::now(),
        })
    }

    pub fn into_completed(self) -> Result<CompletedSession, SessionError> {
        self.completed()
    }
}
