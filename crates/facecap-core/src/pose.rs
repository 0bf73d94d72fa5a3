//! Pose evaluation — does the current face satisfy the active pose?
//!
//! The evaluator is stateless: one frame in, one verdict out. Requiring the
//! pose to be *held* is the hold timer's job, not this module's.

use crate::landmarks::{FaceFeatures, FaceLandmarks, LandmarkLayout};
use crate::template::PoseSpec;
use crate::types::{Orientation, PoseId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_TOLERANCE_DEG: f32 = 8.0;
pub const DEFAULT_SMILE_THRESHOLD: f32 = 0.6;
/// Allowed eye-distance deviation as a fraction of the target.
pub const DEFAULT_DISTANCE_TOLERANCE: f32 = 0.25;

/// User-facing instruction attached to every verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guidance {
    AlignFace,
    LightingTooDim,
    HoldSteady,
    MoveCloser,
    MoveBack,
    TiltHeadStraight,
    TurnLeft { overshoot: bool },
    TurnRight { overshoot: bool },
    LookUp { overshoot: bool },
    LookDown { overshoot: bool },
    Smile,
    Perfect,
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (text, overshoot) = match *self {
            Guidance::AlignFace => ("Align your face", false),
            Guidance::LightingTooDim => ("Lighting too dim", false),
            Guidance::HoldSteady => ("Hold Steady", false),
            Guidance::MoveCloser => ("Move Closer", false),
            Guidance::MoveBack => ("Move Back", false),
            Guidance::TiltHeadStraight => ("Tilt head straight", false),
            Guidance::TurnLeft { overshoot } => ("Turn Left", overshoot),
            Guidance::TurnRight { overshoot } => ("Turn Right", overshoot),
            Guidance::LookUp { overshoot } => ("Look Up", overshoot),
            Guidance::LookDown { overshoot } => ("Look Down", overshoot),
            Guidance::Smile => ("Show us a smile!", false),
            Guidance::Perfect => ("Perfect! Hold steady...", false),
        };
        if overshoot {
            write!(f, "{text} (Too much)")
        } else {
            f.write_str(text)
        }
    }
}

/// Outcome of checking one frame against one pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_correct: bool,
    pub guidance: Guidance,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            is_correct: true,
            guidance: Guidance::Perfect,
        }
    }

    pub fn fail(guidance: Guidance) -> Self {
        Self {
            is_correct: false,
            guidance,
        }
    }
}

/// Runtime-tunable evaluation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    /// Yaw/pitch tolerance in degrees. Roll is allowed twice this.
    pub tolerance_deg: f32,
    pub smile_threshold: f32,
    pub distance_tolerance: f32,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            tolerance_deg: DEFAULT_TOLERANCE_DEG,
            smile_threshold: DEFAULT_SMILE_THRESHOLD,
            distance_tolerance: DEFAULT_DISTANCE_TOLERANCE,
        }
    }
}

/// What a predicate gets to see besides the face features.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub settings: &'a EvaluatorSettings,
    pub orientation: Orientation,
}

/// Acceptance predicate of a pose. The evaluator depends only on this, so a
/// pose can be judged by any geometric rule.
pub trait PosePredicate {
    fn check(&self, features: &FaceFeatures, ctx: &EvalContext<'_>) -> Verdict;
}

/// Head axis a pose constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Yaw,
    Pitch,
}

/// Expected eye distance per orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeDistance {
    pub landscape: f32,
    pub portrait: f32,
}

impl EyeDistance {
    pub fn for_orientation(&self, orientation: Orientation) -> f32 {
        match orientation {
            Orientation::Landscape => self.landscape,
            Orientation::Portrait => self.portrait,
        }
    }

    fn set(&mut self, orientation: Orientation, value: f32) {
        match orientation {
            Orientation::Landscape => self.landscape = value,
            Orientation::Portrait => self.portrait = value,
        }
    }
}

/// Stock acceptance criteria: distance, roll, constrained axes, expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseCriteria {
    pub yaw: f32,
    pub pitch: f32,
    #[serde(default)]
    pub roll: f32,
    /// Axes checked against `tolerance_deg`, in order.
    #[serde(default)]
    pub axes: Vec<Axis>,
    #[serde(default)]
    pub require_smile: bool,
    pub eye_distance: EyeDistance,
}

impl PoseCriteria {
    fn check_axis(&self, axis: Axis, features: &FaceFeatures, tolerance: f32) -> Option<Guidance> {
        let (detected, target) = match axis {
            Axis::Yaw => (features.yaw, self.yaw),
            Axis::Pitch => (features.pitch, self.pitch),
        };
        let diff = detected - target;
        if diff.abs() <= tolerance {
            return None;
        }
        // Only a deliberate turn can be overdone: the target lies outside the
        // neutral band and the face went past it, away from neutral.
        let overshoot = target.abs() > tolerance && diff.signum() == target.signum();
        Some(match (axis, diff < 0.0) {
            (Axis::Yaw, true) => Guidance::TurnRight { overshoot },
            (Axis::Yaw, false) => Guidance::TurnLeft { overshoot },
            (Axis::Pitch, true) => Guidance::LookUp { overshoot },
            (Axis::Pitch, false) => Guidance::LookDown { overshoot },
        })
    }
}

impl PosePredicate for PoseCriteria {
    fn check(&self, features: &FaceFeatures, ctx: &EvalContext<'_>) -> Verdict {
        let settings = ctx.settings;

        let target_distance = self.eye_distance.for_orientation(ctx.orientation);
        let distance_diff = features.eye_distance - target_distance;
        if distance_diff.abs() > target_distance * settings.distance_tolerance {
            return Verdict::fail(if distance_diff < 0.0 {
                Guidance::MoveCloser
            } else {
                Guidance::MoveBack
            });
        }

        if (features.roll - self.roll).abs() > settings.tolerance_deg * 2.0 {
            return Verdict::fail(Guidance::TiltHeadStraight);
        }

        for &axis in &self.axes {
            if let Some(g) = self.check_axis(axis, features, settings.tolerance_deg) {
                return Verdict::fail(g);
            }
        }

        if self.require_smile && features.smile < settings.smile_threshold {
            return Verdict::fail(Guidance::Smile);
        }

        Verdict::pass()
    }
}

/// Per-pose targets recorded from live features in calibration mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Calibration {
    entries: HashMap<PoseId, PoseCriteria>,
}

impl Calibration {
    /// Record `features` as the target for `spec`, keeping the other
    /// orientation's eye distance from any earlier calibration or the template.
    pub fn record(&mut self, spec: &PoseSpec, features: &FaceFeatures, orientation: Orientation) {
        let mut criteria = self.criteria_for(spec).clone();
        criteria.yaw = features.yaw;
        criteria.pitch = features.pitch;
        criteria.roll = features.roll;
        criteria.eye_distance.set(orientation, features.eye_distance);

        tracing::info!(
            pose = %spec.id,
            yaw = criteria.yaw,
            pitch = criteria.pitch,
            roll = criteria.roll,
            eye_distance = features.eye_distance,
            ?orientation,
            "calibrated pose target"
        );
        self.entries.insert(spec.id.clone(), criteria);
    }

    /// Calibrated criteria for `spec`, or the template's own.
    pub fn criteria_for<'a>(&'a self, spec: &'a PoseSpec) -> &'a PoseCriteria {
        self.entries.get(&spec.id).unwrap_or(&spec.criteria)
    }

}

/// Stateless pose checker.
#[derive(Debug, Clone, Default)]
pub struct PoseEvaluator {
    pub layout: LandmarkLayout,
    pub settings: EvaluatorSettings,
}

impl PoseEvaluator {
    pub fn new(layout: LandmarkLayout, settings: EvaluatorSettings) -> Self {
        Self { layout, settings }
    }

    /// Judge `face` against an arbitrary predicate. No face is never correct.
    pub fn evaluate_with<P: PosePredicate + ?Sized>(
        &self,
        face: Option<&FaceLandmarks>,
        predicate: &P,
        orientation: Orientation,
    ) -> Verdict {
        let Some(face) = face else {
            return Verdict::fail(Guidance::AlignFace);
        };
        let Some(features) = FaceFeatures::extract(face, &self.layout) else {
            tracing::debug!(points = face.points.len(), "landmark set too sparse for layout");
            return Verdict::fail(Guidance::AlignFace);
        };
        let ctx = EvalContext {
            settings: &self.settings,
            orientation,
        };
        predicate.check(&features, &ctx)
    }

    /// Judge `face` against the pose spec, honouring calibrated targets.
    pub fn evaluate(
        &self,
        face: Option<&FaceLandmarks>,
        spec: &PoseSpec,
        orientation: Orientation,
        calibration: &Calibration,
    ) -> Verdict {
        self.evaluate_with(face, calibration.criteria_for(spec), orientation)
    }
}
