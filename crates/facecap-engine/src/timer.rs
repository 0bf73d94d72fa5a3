//! Hold-to-capture state machine.
//!
//! `Idle → Holding → Committed`, with any loss of the gate while Holding
//! dropping straight back to `Idle`. Time is always passed in so the machine
//! can be driven by a real clock, a paused tokio clock, or a test.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_HOLD: Duration = Duration::from_millis(2000);

/// Which session version and pose a hold belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldKey {
    pub generation: u64,
    pub pose_index: usize,
}

/// Identity of one hold attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldTicket {
    pub generation: u64,
    pub pose_index: usize,
    pub attempt: u64,
}

impl HoldTicket {
    pub fn key(&self) -> HoldKey {
        HoldKey {
            generation: self.generation,
            pose_index: self.pose_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldPhase {
    Idle,
    Holding,
    Committed,
}

/// Transition output of the timer, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    Started(HoldTicket),
    /// Halfway through the hold: grab the candidate frame.
    Capture(HoldTicket),
    /// Hold completed: the candidate becomes the pose's image.
    Commit(HoldTicket),
    /// Hold broken before commit; any candidate must be dropped.
    Cancelled(HoldTicket),
}

/// Point-in-time view of the timer for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub phase: HoldPhase,
    pub elapsed_ms: u64,
    pub progress: f32,
    pub capture_triggered: bool,
}

#[derive(Debug, Clone, Copy)]
enum HoldState {
    Idle,
    Holding {
        ticket: HoldTicket,
        started: Instant,
        duration: Duration,
        capture_fired: bool,
    },
    Committed {
        ticket: HoldTicket,
    },
}

#[derive(Debug, Clone)]
pub struct HoldTimer {
    duration: Duration,
    state: HoldState,
    attempts: u64,
}

impl Default for HoldTimer {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD)
    }
}

impl HoldTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: HoldState::Idle,
            attempts: 0,
        }
    }

    /// Hold duration for the next attempt. A hold already running keeps
    /// the duration it started with.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn phase(&self) -> HoldPhase {
        match self.state {
            HoldState::Idle => HoldPhase::Idle,
            HoldState::Holding { .. } => HoldPhase::Holding,
            HoldState::Committed { .. } => HoldPhase::Committed,
        }
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.state, HoldState::Holding { .. })
    }

    /// Ticket of the live (or just committed) attempt.
    pub fn ticket(&self) -> Option<HoldTicket> {
        match self.state {
            HoldState::Idle => None,
            HoldState::Holding { ticket, .. } | HoldState::Committed { ticket } => Some(ticket),
        }
    }

    /// Feed the current gate value.
    ///
    /// `armed` is "pose correct and not transitioning"; `key` identifies the
    /// pose it refers to. Deadlines already due are fired first.
    pub fn observe(&mut self, now: Instant, armed: bool, key: HoldKey) -> Vec<HoldEvent> {
        let mut events = self.advance(now);

        match self.state {
            HoldState::Idle if armed => {
                self.attempts += 1;
                let ticket = HoldTicket {
                    generation: key.generation,
                    pose_index: key.pose_index,
                    attempt: self.attempts,
                };
                self.state = HoldState::Holding {
                    ticket,
                    started: now,
                    duration: self.duration,
                    capture_fired: false,
                };
                events.push(HoldEvent::Started(ticket));
                // A zero-length hold completes on the spot.
                events.extend(self.advance(now));
            }
            HoldState::Holding { ticket, .. } if !armed || ticket.key() != key => {
                self.state = HoldState::Idle;
                events.push(HoldEvent::Cancelled(ticket));
            }
            HoldState::Committed { ticket } if !armed || ticket.key() != key => {
                self.state = HoldState::Idle;
            }
            _ => {}
        }

        events
    }

    /// Fire whatever deadlines are due at `now`. Both fire, in order, if a
    /// late call skipped past the midpoint and the end together.
    pub fn advance(&mut self, now: Instant) -> Vec<HoldEvent> {
        let mut events = Vec::new();
        if let HoldState::Holding {
            ticket,
            started,
            duration,
            ref mut capture_fired,
        } = self.state
        {
            let elapsed = now.saturating_duration_since(started);
            if !*capture_fired && elapsed >= duration / 2 {
                *capture_fired = true;
                events.push(HoldEvent::Capture(ticket));
            }
            if elapsed >= duration {
                self.state = HoldState::Committed { ticket };
                events.push(HoldEvent::Commit(ticket));
            }
        }
        events
    }

    /// Drop any live attempt. Returns the cancellation if a hold was running.
    pub fn cancel(&mut self) -> Option<HoldEvent> {
        let ticket = match self.state {
            HoldState::Holding { ticket, .. } => Some(ticket),
            _ => None,
        };
        self.state = HoldState::Idle;
        ticket.map(HoldEvent::Cancelled)
    }

    /// `elapsed / duration` while Holding, 0 otherwise.
    pub fn progress(&self, now: Instant) -> f32 {
        match self.state {
            HoldState::Holding {
                started, duration, ..
            } => {
                if duration.is_zero() {
                    return 1.0;
                }
                let elapsed = now.saturating_duration_since(started);
                (elapsed.as_secs_f32() / duration.as_secs_f32()).min(1.0)
            }
            _ => 0.0,
        }
    }

    /// The next instant at which `advance` would produce an event.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            HoldState::Holding {
                started,
                duration,
                capture_fired,
                ..
            } => Some(if capture_fired {
                started + duration
            } else {
                started + duration / 2
            }),
            _ => None,
        }
    }

    pub fn snapshot(&self, now: Instant) -> TimerSnapshot {
        let (elapsed, capture_triggered) = match self.state {
            HoldState::Holding {
                started,
                capture_fired,
                ..
            } => (now.saturating_duration_since(started), capture_fired),
            _ => (Duration::ZERO, false),
        };
        TimerSnapshot {
            phase: self.phase(),
            elapsed_ms: elapsed.as_millis() as u64,
            progress: self.progress(now),
            capture_triggered,
        }
    }
}
