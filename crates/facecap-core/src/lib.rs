//! facecap-core — Quality scoring, pose evaluation and face cropping.
//!
//! Everything here is synchronous and free of timers: the engine crate
//! decides *when* to call it, this crate decides *what* a frame is worth.

pub mod crop;
pub mod detector;
pub mod landmarks;
pub mod pose;
pub mod quality;
pub mod template;
pub mod types;

pub use crop::{CropError, CropRegion, FrameExtractor, StillImage};
pub use detector::{DetectorError, LandmarkDetector, ManualDetector, ManualDetectorHandle};
pub use landmarks::{FaceFeatures, FaceLandmarks, HeadPose, Landmark, LandmarkLayout};
pub use pose::{
    Calibration, EvalContext, EvaluatorSettings, Guidance, PoseCriteria, PoseEvaluator,
    PosePredicate, Verdict,
};
pub use quality::{QualityAnalyzer, QualityReading, QualityThresholds};
pub use template::{PoseSpec, PoseTemplate, TemplateError};
pub use types::{NormalizedBox, Orientation, PoseId};
