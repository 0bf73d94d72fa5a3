use crate::config::{EngineConfig, Tuning};
use crate::events::{EngineEvent, EngineStatus, FaultCode};
use crate::pipeline::{CalibrationError, CapturePipeline};
use crate::sequence::SessionError;
use crate::timer::TimerSnapshot;
use crate::upload::UploadSink;
use facecap_core::{LandmarkDetector, PoseId, PoseTemplate, QualityReading};
use facecap_frame::Frame;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

/// Latest-frame slot shared with the camera source.
pub type FrameSender = watch::Sender<Option<Arc<Frame>>>;
pub type FrameReceiver = watch::Receiver<Option<Arc<Frame>>>;

/// Sleep target used when nothing is scheduled; the branch is disabled anyway.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Point-in-time state of a running engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub session_id: Uuid,
    pub index: usize,
    pub total: usize,
    pub current_pose: Option<PoseId>,
    pub captured: Vec<PoseId>,
    pub timer: TimerSnapshot,
    pub quality: Option<QualityReading>,
}

/// Messages sent from handles to the engine task.
enum EngineRequest {
    Retake {
        pose_id: PoseId,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Calibrate {
        reply: oneshot::Sender<Result<PoseId, EngineError>>,
    },
    UpdateTuning {
        tuning: Tuning,
        reply: oneshot::Sender<()>,
    },
    Tuning {
        reply: oneshot::Sender<Tuning>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    ReportFault {
        code: FaultCode,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    events: broadcast::Sender<EngineEvent>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Subscribe to UX events. Slow receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    /// Wait for the next status change.
    pub async fn status_changed(&mut self) -> Result<EngineStatus, EngineError> {
        self.status
            .changed()
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(*self.status.borrow_and_update())
    }

    /// Rewind to `pose_id`, discarding its capture and all later ones.
    /// Returns the new active index.
    pub async fn retake(&self, pose_id: PoseId) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Retake { pose_id, reply })
            .await?
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await
    }

    /// Use the live face as the current pose's target.
    pub async fn calibrate(&self) -> Result<PoseId, EngineError> {
        self.request(|reply| EngineRequest::Calibrate { reply })
            .await?
    }

    pub async fn update_tuning(&self, tuning: Tuning) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::UpdateTuning { tuning, reply })
            .await
    }

    pub async fn tuning(&self) -> Result<Tuning, EngineError> {
        self.request(|reply| EngineRequest::Tuning { reply }).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await
    }

    /// Surface an irrecoverable condition from the host (e.g. the camera
    /// permission was revoked). Pending holds are cancelled.
    pub async fn report_fault(&self, code: FaultCode) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ReportFault { code, reply })
            .await
    }

    /// Cancel every pending timer, release the detector and stop the task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Shutdown { reply }).await
    }
}

/// Spawn the engine on the current tokio runtime.
///
/// The detector is initialized inside the task; if that fails the engine
/// stays up in `Fault(DetectorUnavailable)` so the host can report it.
pub fn spawn_engine(
    config: EngineConfig,
    template: PoseTemplate,
    detector: Box<dyn LandmarkDetector>,
    frames: FrameReceiver,
    sink: Option<Box<dyn UploadSink>>,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineRequest>(16);
    let (events, _) = broadcast::channel(config.event_capacity.max(1));
    let (status_tx, status_rx) = watch::channel(EngineStatus::Starting);

    let actor = EngineActor {
        pipeline: CapturePipeline::new(&config, template, detector),
        tuning: config.tuning,
        tick_interval: config.tick_interval,
        rx,
        frames,
        events: events.clone(),
        status: EngineStatus::Starting,
        status_tx,
        sink,
    };
    tokio::spawn(actor.run());

    EngineHandle {
        tx,
        events,
        status: status_rx,
    }
}

struct EngineActor {
    pipeline: CapturePipeline,
    tuning: Tuning,
    tick_interval: Duration,
    rx: mpsc::Receiver<EngineRequest>,
    frames: FrameReceiver,
    events: broadcast::Sender<EngineEvent>,
    status: EngineStatus,
    status_tx: watch::Sender<EngineStatus>,
    sink: Option<Box<dyn UploadSink>>,
}

/// Engine-side "now" as a std instant. Follows tokio's clock, so paused
/// test time drives the pipeline too.
fn clock() -> std::time::Instant {
    Instant::now().into_std()
}

fn poll_interval(period: Duration) -> Interval {
    let mut poll = time::interval(period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll
}

impl EngineActor {
    async fn run(mut self) {
        match self.pipeline.start() {
            Ok(()) => self.set_status(EngineStatus::Ready),
            Err(e) => {
                tracing::error!(error = %e, "landmark detector unavailable");
                self.set_status(EngineStatus::Fault(FaultCode::DetectorUnavailable));
            }
        }

        let mut poll = poll_interval(self.tuning.poll_interval());
        let mut tick = time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames_open = true;

        tracing::info!(
            hold_ms = self.tuning.hold_ms,
            poll_ms = self.tuning.poll_ms,
            gate = ?self.tuning.quality_gate,
            "engine task started"
        );

        loop {
            let now = Instant::now();
            let active = matches!(self.status, EngineStatus::Ready | EngineStatus::Complete);
            let holding = active && self.pipeline.is_holding();
            let deadline = if active {
                self.pipeline.next_deadline(now.into_std())
            } else {
                None
            };
            let wake = deadline
                .map(Instant::from_std)
                .unwrap_or(now + IDLE_SLEEP);

            tokio::select! {
                biased;

                req = self.rx.recv() => {
                    let Some(req) = req else {
                        tracing::info!("all engine handles dropped");
                        self.stop();
                        break;
                    };
                    if !self.handle_request(req, &mut poll) {
                        break;
                    }
                }
                _ = time::sleep_until(wake), if deadline.is_some() => {
                    let events = self.pipeline.tick(clock());
                    self.publish(events);
                }
                changed = self.frames.changed(), if frames_open && active => {
                    match changed {
                        Ok(()) => {
                            let frame = self.frames.borrow_and_update().clone();
                            if let Some(frame) = frame {
                                let events = self.pipeline.on_frame(frame, clock());
                                self.publish(events);
                            }
                        }
                        Err(_) => {
                            tracing::warn!("frame source closed");
                            frames_open = false;
                        }
                    }
                }
                _ = tick.tick(), if holding => {
                    let events = self.pipeline.tick(clock());
                    self.publish(events);
                }
                _ = poll.tick(), if active => {
                    let events = self.pipeline.poll_quality(clock());
                    self.publish(events);
                }
            }
        }

        tracing::info!("engine task exiting");
    }

    /// Returns `false` when the engine should stop.
    fn handle_request(&mut self, req: EngineRequest, poll: &mut Interval) -> bool {
        match req {
            EngineRequest::Retake { pose_id, reply } => {
                let result = self
                    .pipeline
                    .retake(&pose_id, clock())
                    .map(|events| {
                        self.publish(events);
                        self.pipeline.session().index()
                    })
                    .map_err(EngineError::from);
                if result.is_ok() {
                    self.resume_after_edit();
                }
                let _ = reply.send(result);
            }
            EngineRequest::Reset { reply } => {
                let events = self.pipeline.reset(clock());
                self.publish(events);
                self.resume_after_edit();
                let _ = reply.send(());
            }
            EngineRequest::Calibrate { reply } => {
                let result = self.pipeline.calibrate().map_err(EngineError::from);
                if let Ok(pose_id) = &result {
                    self.publish(vec![EngineEvent::Calibrated {
                        pose_id: pose_id.clone(),
                    }]);
                }
                let _ = reply.send(result);
            }
            EngineRequest::UpdateTuning { tuning, reply } => {
                if tuning.poll_ms != self.tuning.poll_ms {
                    *poll = poll_interval(tuning.poll_interval());
                }
                self.pipeline.apply_tuning(&tuning);
                self.tuning = tuning;
                let _ = reply.send(());
            }
            EngineRequest::Tuning { reply } => {
                let _ = reply.send(self.tuning);
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineRequest::ReportFault { code, reply } => {
                tracing::error!(?code, "fault reported by host");
                let events = self.pipeline.suspend();
                self.publish(events);
                self.set_status(EngineStatus::Fault(code));
                let _ = reply.send(());
            }
            EngineRequest::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> EngineSnapshot {
        let session = self.pipeline.session();
        EngineSnapshot {
            status: self.status,
            session_id: session.id(),
            index: session.index(),
            total: session.len(),
            current_pose: session.current_pose().map(|p| p.id.clone()),
            captured: session.images().iter().map(|c| c.pose_id.clone()).collect(),
            timer: self.pipeline.timer().snapshot(clock()),
            quality: self.pipeline.quality(),
        }
    }

    fn resume_after_edit(&mut self) {
        if self.status == EngineStatus::Complete {
            self.set_status(EngineStatus::Ready);
        }
    }

    fn stop(&mut self) {
        let events = self.pipeline.shutdown();
        self.publish(events);
        self.set_status(EngineStatus::Stopped);
    }

    fn set_status(&mut self, status: EngineStatus) {
        if self.status == status {
            return;
        }
        tracing::info!(from = ?self.status, to = ?status, "engine status");
        self.status = status;
        self.status_tx.send_replace(status);
        let _ = self.events.send(EngineEvent::Status { status });
    }

    fn publish(&mut self, events: Vec<EngineEvent>) {
        for event in events {
            let complete = matches!(event, EngineEvent::Complete { .. });
            // No receivers is fine; events are side-effect only.
            let _ = self.events.send(event);
            if complete {
                self.hand_off();
                self.set_status(EngineStatus::Complete);
            }
        }
    }

    fn hand_off(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match self.pipeline.completed() {
            Ok(done) => match sink.deliver(&done) {
                Ok(()) => tracing::info!(session = %done.id, images = done.images.len(), "session handed off"),
                Err(e) => tracing::warn!(error = %e, session = %done.id, "upload sink failed"),
            },
            Err(e) => tracing::warn!(error = %e, "completion reported for an incomplete session"),
        }
    }
}
