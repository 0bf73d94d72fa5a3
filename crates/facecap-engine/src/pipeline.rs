//! Synchronous capture pipeline.
//!
//! Owns the detector, the hold timer and the session, and turns frames,
//! quality polls and clock ticks into [`EngineEvent`]s. It never sleeps or
//! spawns: the async engine decides when each entry point runs and passes
//! the current time in.

use crate::config::{EngineConfig, QualityGate, Tuning};
use crate::events::EngineEvent;
use crate::sequence::{CaptureSession, CommitOutcome, CompletedSession, PoseState, SessionError};
use crate::timer::{HoldEvent, HoldTicket, HoldTimer};
use facecap_core::{
    Calibration, DetectorError, EvaluatorSettings, FaceFeatures, FaceLandmarks, FrameExtractor,
    Guidance, LandmarkDetector, LandmarkLayout, Orientation, PoseEvaluator, PoseId, PoseTemplate,
    QualityAnalyzer, QualityReading, Verdict,
};
use facecap_frame::Frame;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("no face in the latest frame")]
    NoFace,
    #[error("session complete, no pose to calibrate")]
    SessionComplete,
}

/// Latest frame and what the detector saw in it.
struct Observation {
    frame: Arc<Frame>,
    face: Option<FaceLandmarks>,
}

/// Candidate taken at the hold midpoint, promoted on commit.
struct Staged {
    ticket: HoldTicket,
    frame: Arc<Frame>,
    face: Option<FaceLandmarks>,
}

pub struct CapturePipeline {
    analyzer: QualityAnalyzer,
    evaluator: PoseEvaluator,
    extractor: FrameExtractor,
    calibration: Calibration,
    detector: Box<dyn LandmarkDetector>,
    detector_ready: bool,
    gate: QualityGate,
    timer: HoldTimer,
    session: CaptureSession,
    quality: Option<QualityReading>,
    latest: Option<Observation>,
    staged: Option<Staged>,
    last_state: Option<(PoseState, Guidance)>,
}

impl CapturePipeline {
    pub fn new(
        config: &EngineConfig,
        template: PoseTemplate,
        detector: Box<dyn LandmarkDetector>,
    ) -> Self {
        let layout = LandmarkLayout::default();
        let tuning = &config.tuning;
        Self {
            analyzer: QualityAnalyzer::new(tuning.thresholds(), config.analysis_size),
            evaluator: PoseEvaluator::new(
                layout,
                EvaluatorSettings {
                    tolerance_deg: tuning.tolerance_deg,
                    smile_threshold: tuning.smile_threshold,
                    ..EvaluatorSettings::default()
                },
            ),
            extractor: FrameExtractor::new(layout, config.crop_enabled),
            calibration: Calibration::default(),
            detector,
            detector_ready: false,
            gate: tuning.quality_gate,
            timer: HoldTimer::new(tuning.hold()),
            session: CaptureSession::new(template, tuning.transition()),
            quality: None,
            latest: None,
            staged: None,
            last_state: None,
        }
    }

    /// Initialize the detector. Until this succeeds every frame counts as
    /// "no face".
    pub fn start(&mut self) -> Result<(), DetectorError> {
        self.detector.init()?;
        self.detector_ready = true;
        tracing::info!(session = %self.session.id(), poses = self.session.len(), "pipeline started");
        Ok(())
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn timer(&self) -> &HoldTimer {
        &self.timer
    }

    pub fn quality(&self) -> Option<QualityReading> {
        self.quality
    }

    pub fn is_holding(&self) -> bool {
        self.timer.is_holding()
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do: a hold
    /// deadline or the end of the transition window.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        match (self.timer.next_deadline(), self.session.transition_deadline(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn completed(&self) -> Result<CompletedSession, SessionError> {
        self.session.completed()
    }

    pub fn apply_tuning(&mut self, tuning: &Tuning) {
        self.analyzer.thresholds = tuning.thresholds();
        self.evaluator.settings.tolerance_deg = tuning.tolerance_deg;
        self.evaluator.settings.smile_threshold = tuning.smile_threshold;
        self.timer.set_duration(tuning.hold());
        self.session.set_transition(tuning.transition());
        self.gate = tuning.quality_gate;
        tracing::info!(?tuning, "tuning applied");
    }

    /// New camera frame: detect, then re-evaluate.
    pub fn on_frame(&mut self, frame: Arc<Frame>, now: Instant) -> Vec<EngineEvent> {
        let face = if self.detector_ready {
            match self.detector.detect(&frame) {
                Ok(face) => face,
                Err(e) => {
                    tracing::warn!(error = %e, sequence = frame.sequence, "detector failed, treating as no face");
                    None
                }
            }
        } else {
            None
        };
        self.latest = Some(Observation { frame, face });

        // Nothing is allowed to hold before the first quality reading.
        if self.quality.is_none() {
            return self.poll_quality(now);
        }
        self.step(now)
    }

    /// Quality poll: score the latest frame, then re-evaluate.
    pub fn poll_quality(&mut self, now: Instant) -> Vec<EngineEvent> {
        let Some(obs) = &self.latest else {
            return Vec::new();
        };
        let roi = obs
            .face
            .as_ref()
            .and_then(|f| f.bounds(self.evaluator.layout.outline));
        let reading = self.analyzer.analyze(&obs.frame, roi.as_ref());
        self.quality = Some(reading);

        let mut events = vec![EngineEvent::Quality { reading }];
        events.extend(self.step(now));
        events
    }

    /// Clock tick: fire due deadlines, report hold progress.
    pub fn tick(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = self.step(now);
        if let Some(ticket) = self.timer.ticket().filter(|_| self.timer.is_holding()) {
            events.push(EngineEvent::Progress {
                pose_id: self.pose_id_at(ticket.pose_index),
                progress: self.timer.progress(now),
            });
        }
        events
    }

    /// Discard `pose_id`'s capture and everything after it.
    pub fn retake(&mut self, pose_id: &PoseId, now: Instant) -> Result<Vec<EngineEvent>, SessionError> {
        let index = self.session.retake(pose_id, now)?;
        let mut events = self.cancel_pending();
        events.push(EngineEvent::Retake {
            pose_id: pose_id.clone(),
            index,
        });
        events.extend(self.step(now));
        Ok(events)
    }

    pub fn reset(&mut self, now: Instant) -> Vec<EngineEvent> {
        self.session.reset(now);
        let mut events = self.cancel_pending();
        events.push(EngineEvent::Reset);
        events.extend(self.step(now));
        events
    }

    /// Record the live face as the active pose's target.
    pub fn calibrate(&mut self) -> Result<PoseId, CalibrationError> {
        let spec = self
            .session
            .current_pose()
            .ok_or(CalibrationError::SessionComplete)?
            .clone();
        let obs = self.latest.as_ref().ok_or(CalibrationError::NoFace)?;
        let face = obs.face.as_ref().ok_or(CalibrationError::NoFace)?;
        let features =
            FaceFeatures::extract(face, &self.evaluator.layout).ok_or(CalibrationError::NoFace)?;
        let orientation = Orientation::of(obs.frame.width, obs.frame.height);
        self.calibration.record(&spec, &features, orientation);
        Ok(spec.id)
    }

    /// Cancel pending holds and release the detector.
    pub fn shutdown(&mut self) -> Vec<EngineEvent> {
        let events = self.suspend();
        if self.detector_ready {
            self.detector.dispose();
            self.detector_ready = false;
        }
        tracing::info!(session = %self.session.id(), "pipeline shut down");
        events
    }

    /// Stop timing without touching the session (e.g. camera lost).
    pub fn suspend(&mut self) -> Vec<EngineEvent> {
        self.latest = None;
        self.cancel_pending()
    }

    fn cancel_pending(&mut self) -> Vec<EngineEvent> {
        self.staged = None;
        match self.timer.cancel() {
            Some(HoldEvent::Cancelled(ticket)) => {
                tracing::debug!(?ticket, "hold cancelled");
                vec![EngineEvent::Cancelled {
                    pose_id: self.pose_id_at(ticket.pose_index),
                    ticket,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn pose_id_at(&self, index: usize) -> PoseId {
        self.session
            .poses()
            .get(index)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| PoseId::new(format!("#{index}")))
    }

    fn verdict(&self, now: Instant) -> Verdict {
        let Some(spec) = self.session.current_pose() else {
            return Verdict::fail(Guidance::AlignFace);
        };
        if self.session.is_transitioning(now) {
            return Verdict::fail(Guidance::AlignFace);
        }
        let Some(obs) = &self.latest else {
            return Verdict::fail(Guidance::AlignFace);
        };
        let Some(face) = obs.face.as_ref() else {
            return Verdict::fail(Guidance::AlignFace);
        };

        if self.gate == QualityGate::Block {
            if let Some(q) = self.quality {
                if q.is_low_light {
                    return Verdict::fail(Guidance::LightingTooDim);
                }
                if q.is_blurry {
                    return Verdict::fail(Guidance::HoldSteady);
                }
            }
        }

        let orientation = Orientation::of(obs.frame.width, obs.frame.height);
        self.evaluator
            .evaluate(Some(face), spec, orientation, &self.calibration)
    }

    fn step(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let generation = self.session.generation();

        let mut verdict = self.verdict(now);
        for ev in self.timer.observe(now, verdict.is_correct, self.session.hold_key()) {
            self.on_hold_event(ev, now, &mut events);
        }

        // A commit moved the session; let the timer see the new pose.
        if self.session.generation() != generation {
            verdict = self.verdict(now);
            for ev in self.timer.observe(now, verdict.is_correct, self.session.hold_key()) {
                self.on_hold_event(ev, now, &mut events);
            }
        }

        let state = self.session.pose_state(now, verdict.is_correct);
        let current = (state, verdict.guidance);
        if self.last_state.as_ref() != Some(&current) {
            let (state, guidance) = &current;
            tracing::debug!(pose = ?state.pose_id, correct = state.is_correct, %guidance, "pose state");
            events.push(EngineEvent::PoseState {
                pose_id: state.pose_id.clone(),
                index: self.session.index(),
                is_correct: state.is_correct,
                is_transitioning: state.is_transitioning,
                guidance: *guidance,
                message: guidance.to_string(),
            });
            self.last_state = Some(current);
        }

        events
    }

    fn on_hold_event(&mut self, ev: HoldEvent, now: Instant, events: &mut Vec<EngineEvent>) {
        match ev {
            HoldEvent::Started(ticket) => {
                let pose_id = self.pose_id_at(ticket.pose_index);
                tracing::debug!(pose = %pose_id, attempt = ticket.attempt, "hold started");
                events.push(EngineEvent::HoldStarted { pose_id, ticket });
            }
            HoldEvent::Capture(ticket) => {
                if let Some(obs) = &self.latest {
                    self.staged = Some(Staged {
                        ticket,
                        frame: Arc::clone(&obs.frame),
                        face: obs.face.clone(),
                    });
                }
                events.push(EngineEvent::Capture {
                    pose_id: self.pose_id_at(ticket.pose_index),
                    ticket,
                });
            }
            HoldEvent::Commit(ticket) => self.commit(ticket, now, events),
            HoldEvent::Cancelled(ticket) => {
                if self.staged.as_ref().is_some_and(|s| s.ticket == ticket) {
                    self.staged = None;
                }
                let pose_id = self.pose_id_at(ticket.pose_index);
                tracing::debug!(pose = %pose_id, attempt = ticket.attempt, "hold broken");
                events.push(EngineEvent::Cancelled { pose_id, ticket });
            }
        }
    }

    fn commit(&mut self, ticket: HoldTicket, now: Instant, events: &mut Vec<EngineEvent>) {
        let staged = match self.staged.take() {
            Some(s) if s.ticket == ticket => Some(s),
            Some(s) => {
                tracing::warn!(staged = ?s.ticket, commit = ?ticket, "discarding candidate from another hold");
                None
            }
            None => None,
        };
        let (frame, face) = match (staged, &self.latest) {
            (Some(s), _) => (s.frame, s.face),
            (None, Some(obs)) => (Arc::clone(&obs.frame), obs.face.clone()),
            (None, None) => {
                tracing::warn!(?ticket, "commit with no frame available");
                self.timer.cancel();
                return;
            }
        };

        let still = match self.extractor.extract(&frame, face.as_ref()) {
            Ok(still) => still,
            Err(e) => {
                tracing::warn!(error = %e, "still extraction failed, pose not committed");
                self.timer.cancel();
                events.push(EngineEvent::Cancelled {
                    pose_id: self.pose_id_at(ticket.pose_index),
                    ticket,
                });
                return;
            }
        };

        let pose_id = self.pose_id_at(ticket.pose_index);
        let (width, height, cropped) = (still.width, still.height, still.cropped);
        match self.session.on_pose_committed(ticket, still, now) {
            Ok(outcome) => {
                events.push(EngineEvent::Commit {
                    pose_id,
                    index: ticket.pose_index,
                    width,
                    height,
                    cropped,
                });
                if outcome == CommitOutcome::Complete {
                    events.push(EngineEvent::Complete {
                        session_id: self.session.id(),
                        images: self.session.images().len(),
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "commit refused"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::HoldPhase;
    use facecap_core::{HeadPose, ManualDetector, ManualDetectorHandle, PoseSpec};
    use facecap_frame::PixelFormat;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn checker(lo: u8, hi: u8) -> Arc<Frame> {
        let data = (0..100u32 * 100)
            .map(|i| if (i % 100 + i / 100) % 2 == 0 { lo } else { hi })
            .collect();
        Arc::new(Frame::new(data, 100, 100, PixelFormat::Gray8).unwrap())
    }

    /// Bright and sharp.
    fn good_frame() -> Arc<Frame> {
        checker(60, 255)
    }

    /// Sharp but mean brightness 40.
    fn dim_frame() -> Arc<Frame> {
        checker(20, 60)
    }

    fn face_for(spec: &PoseSpec) -> FaceLandmarks {
        let c = &spec.criteria;
        let pose = HeadPose {
            yaw: c.yaw,
            pitch: c.pitch,
            roll: 0.0,
        };
        let mut face =
            FaceLandmarks::synthetic(&LandmarkLayout::MEDIAPIPE_478, pose, c.eye_distance.landscape);
        face.smile = Some(0.9);
        face
    }

    fn pipeline_with(tuning: Tuning) -> (CapturePipeline, ManualDetectorHandle) {
        let (detector, handle) = ManualDetector::new();
        let config = EngineConfig {
            tuning,
            ..EngineConfig::default()
        };
        let mut p = CapturePipeline::new(&config, PoseTemplate::builtin().unwrap(), Box::new(detector));
        p.start().unwrap();
        (p, handle)
    }

    fn pipeline() -> (CapturePipeline, ManualDetectorHandle) {
        pipeline_with(Tuning::default())
    }

    fn current_face(p: &CapturePipeline) -> FaceLandmarks {
        face_for(p.session().current_pose().unwrap())
    }

    fn has(events: &[EngineEvent], f: impl Fn(&EngineEvent) -> bool) -> bool {
        events.iter().any(f)
    }

    fn is_commit(e: &EngineEvent) -> bool {
        matches!(e, EngineEvent::Commit { .. })
    }

    #[test]
    fn test_commit_at_hold_duration_advances() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();

        let ev = p.on_frame(good_frame(), t0);
        assert!(has(&ev, |e| matches!(e, EngineEvent::Quality { .. })));
        assert!(has(&ev, |e| matches!(e, EngineEvent::HoldStarted { .. })));
        assert_eq!(p.next_deadline(t0), Some(t0 + ms(1000)));

        assert!(!has(&p.tick(t0 + ms(999)), |e| matches!(e, EngineEvent::Capture { .. })));
        let ev = p.tick(t0 + ms(1000));
        assert!(has(&ev, |e| matches!(e, EngineEvent::Capture { .. })));
        assert!(p.staged.is_some());

        assert!(!has(&p.tick(t0 + ms(1999)), is_commit));
        let ev = p.tick(t0 + ms(2000));
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::Commit { pose_id, index: 0, .. } if pose_id.as_str() == "front"
        )));
        assert_eq!(p.session().index(), 1);
        assert_eq!(p.session().images().len(), 1);
        assert!(p.staged.is_none());

        // Next pose is in its grace window.
        assert!(p.session().is_transitioning(t0 + ms(2500)));
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::PoseState { is_transitioning: true, is_correct: false, .. }
        )));
    }

    #[test]
    fn test_break_before_commit_discards_candidate() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        p.tick(t0 + ms(1000));
        assert!(p.staged.is_some());

        handle.set_face(None);
        let ev = p.on_frame(good_frame(), t0 + ms(1200));
        assert!(has(&ev, |e| matches!(e, EngineEvent::Cancelled { .. })));
        assert!(p.staged.is_none());
        assert_eq!(p.timer().progress(t0 + ms(1200)), 0.0);

        assert!(!has(&p.tick(t0 + ms(2000)), is_commit));
        assert_eq!(p.session().index(), 0);
        assert!(p.session().images().is_empty());
    }

    #[test]
    fn test_low_light_blocks_hold() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();

        let ev = p.on_frame(dim_frame(), t0);
        let reading = p.quality().unwrap();
        assert_eq!(reading.brightness, 40);
        assert!(reading.is_low_light);
        assert!(!reading.is_blurry);
        assert!(!has(&ev, |e| matches!(e, EngineEvent::HoldStarted { .. })));
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::PoseState { guidance: Guidance::LightingTooDim, .. }
        )));

        p.on_frame(dim_frame(), t0 + ms(100));
        p.tick(t0 + ms(3000));
        assert_eq!(p.timer().phase(), HoldPhase::Idle);
        assert_eq!(p.session().index(), 0);
    }

    #[test]
    fn test_low_light_advisory_still_captures() {
        let (mut p, handle) = pipeline_with(Tuning {
            quality_gate: QualityGate::Advisory,
            ..Tuning::default()
        });
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();

        p.on_frame(dim_frame(), t0);
        assert!(p.quality().unwrap().is_low_light);
        assert!(p.is_holding());
        assert!(has(&p.tick(t0 + ms(2000)), is_commit));
        assert_eq!(p.session().index(), 1);
    }

    #[test]
    fn test_blur_blocks_with_hold_steady() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let flat = Arc::new(Frame::new(vec![200; 100 * 100], 100, 100, PixelFormat::Gray8).unwrap());
        let ev = p.on_frame(flat, Instant::now());
        assert!(p.quality().unwrap().is_blurry);
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::PoseState { guidance: Guidance::HoldSteady, .. }
        )));
        assert!(!p.is_holding());
    }

    #[test]
    fn test_quality_recovery_allows_hold() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(dim_frame(), t0);
        assert!(!p.is_holding());

        p.on_frame(good_frame(), t0 + ms(100));
        // Reading is stale until the next poll.
        assert!(!p.is_holding());
        p.poll_quality(t0 + ms(500));
        assert!(p.is_holding());
    }

    #[test]
    fn test_full_sequence_completes_in_order() {
        let (mut p, handle) = pipeline();
        let mut t = Instant::now();
        let mut completed = false;

        for _ in 0..p.session().len() {
            handle.set_face(Some(current_face(&p)));
            p.on_frame(good_frame(), t);
            assert!(p.is_holding(), "pose {:?} did not start", p.session().current_pose());
            p.tick(t + ms(1000));
            let ev = p.tick(t + ms(2000));
            assert!(has(&ev, is_commit));
            completed = has(&ev, |e| matches!(e, EngineEvent::Complete { images: 6, .. }));
            t += ms(3000);
        }

        assert!(completed);
        assert!(p.session().is_complete());
        let done = p.completed().unwrap();
        let ids: Vec<&str> = done.images.iter().map(|c| c.pose_id.as_str()).collect();
        assert_eq!(
            ids,
            ["front", "left_45", "right_45", "chin_up", "chin_down", "front_smiling"]
        );
        assert!(done.images.iter().all(|c| c.image.cropped));

        // Nothing left to hold.
        p.on_frame(good_frame(), t);
        assert!(!p.is_holding());
    }

    #[test]
    fn test_wrong_pose_never_commits() {
        let (mut p, handle) = pipeline();
        let left = p.session().poses()[1].clone();
        handle.set_face(Some(face_for(&left)));
        let t0 = Instant::now();
        let ev = p.on_frame(good_frame(), t0);
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::PoseState { guidance: Guidance::TurnRight { .. }, .. }
        )));
        assert!(!has(&p.tick(t0 + ms(5000)), is_commit));
    }

    #[test]
    fn test_transition_window_delays_next_hold() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        p.tick(t0 + ms(2000));

        handle.set_face(Some(current_face(&p)));
        p.on_frame(good_frame(), t0 + ms(2100));
        assert!(!p.is_holding());
        assert_eq!(p.next_deadline(t0 + ms(2100)), Some(t0 + ms(3000)));

        // The window closing is enough to arm the next hold.
        p.tick(t0 + ms(3000));
        assert!(p.is_holding());
    }

    #[test]
    fn test_retake_rewinds() {
        let (mut p, handle) = pipeline();
        let mut t = Instant::now();
        for _ in 0..3 {
            handle.set_face(Some(current_face(&p)));
            p.on_frame(good_frame(), t);
            p.tick(t + ms(2000));
            t += ms(3000);
        }
        assert_eq!(p.session().index(), 3);

        let ev = p.retake(&PoseId::from("left_45"), t).unwrap();
        assert!(has(&ev, |e| matches!(e, EngineEvent::Retake { index: 1, .. })));
        assert_eq!(p.session().index(), 1);
        assert_eq!(p.session().images().len(), 1);

        assert!(matches!(
            p.retake(&PoseId::from("nope"), t),
            Err(SessionError::UnknownPose(_))
        ));
    }

    #[test]
    fn test_reset_while_holding_cancels() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        p.tick(t0 + ms(1500));

        let ev = p.reset(t0 + ms(1600));
        assert!(has(&ev, |e| matches!(e, EngineEvent::Cancelled { .. })));
        assert!(has(&ev, |e| matches!(e, EngineEvent::Reset)));
        assert!(p.staged.is_none());
        assert!(!has(&p.tick(t0 + ms(2000)), is_commit));
        assert!(p.session().images().is_empty());
    }

    #[test]
    fn test_progress_reported_while_holding() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        let ev = p.tick(t0 + ms(500));
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::Progress { progress, .. } if (*progress - 0.25).abs() < 1e-6
        )));
    }

    #[test]
    fn test_detector_error_is_no_face() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        handle.fail_next("inference blew up");
        let ev = p.on_frame(good_frame(), Instant::now());
        assert!(!p.is_holding());
        assert!(has(&ev, |e| matches!(
            e,
            EngineEvent::PoseState { guidance: Guidance::AlignFace, .. }
        )));
    }

    #[test]
    fn test_detector_init_failure() {
        let (detector, handle) = ManualDetector::new();
        handle.fail_init("model missing");
        let mut p = CapturePipeline::new(
            &EngineConfig::default(),
            PoseTemplate::builtin().unwrap(),
            Box::new(detector),
        );
        assert!(p.start().is_err());
        handle.set_face(Some(current_face(&p)));
        p.on_frame(good_frame(), Instant::now());
        assert!(!p.is_holding());
        assert_eq!(handle.detect_calls(), 0);
    }

    #[test]
    fn test_calibrate_moves_target() {
        let (mut p, handle) = pipeline();
        let mut face = current_face(&p);
        face.transform = Some(HeadPose { yaw: 20.0, pitch: 0.0, roll: 0.0 }.to_matrix());
        handle.set_face(Some(face));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        assert!(!p.is_holding());

        assert_eq!(p.calibrate().unwrap().as_str(), "front");
        p.on_frame(good_frame(), t0 + ms(10));
        assert!(p.is_holding());
    }

    #[test]
    fn test_calibrate_without_face() {
        let (mut p, _handle) = pipeline();
        assert_eq!(p.calibrate(), Err(CalibrationError::NoFace));
        p.on_frame(good_frame(), Instant::now());
        assert_eq!(p.calibrate(), Err(CalibrationError::NoFace));
    }

    #[test]
    fn test_tuning_changes_hold_duration() {
        let (mut p, handle) = pipeline();
        p.apply_tuning(&Tuning {
            hold_ms: 400,
            ..Tuning::default()
        });
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        assert!(has(&p.tick(t0 + ms(200)), |e| matches!(e, EngineEvent::Capture { .. })));
        assert!(has(&p.tick(t0 + ms(400)), is_commit));
    }

    #[test]
    fn test_shutdown_cancels_and_disposes() {
        let (mut p, handle) = pipeline();
        handle.set_face(Some(current_face(&p)));
        let t0 = Instant::now();
        p.on_frame(good_frame(), t0);
        let ev = p.shutdown();
        assert!(has(&ev, |e| matches!(e, EngineEvent::Cancelled { .. })));
        assert!(handle.is_disposed());
        assert!(!has(&p.tick(t0 + ms(2000)), is_commit));
    }

    #[test]
    fn test_pose_state_emitted_on_change_only() {
        let (mut p, handle) = pipeline();
        handle.set_face(None);
        let t0 = Instant::now();
        let first = p.on_frame(good_frame(), t0);
        assert!(has(&first, |e| matches!(e, EngineEvent::PoseState { .. })));
        let second = p.on_frame(good_frame(), t0 + ms(33));
        assert!(!has(&second, |e| matches!(e, EngineEvent::PoseState { .. })));
    }
}
