//! Facial landmarks as reported by the external detector, and the head-pose
//! features derived from them.

use crate::types::NormalizedBox;
use serde::{Deserialize, Serialize};

/// MediaPipe face-oval landmark indices, clockwise from the forehead.
const MEDIAPIPE_FACE_OVAL: [usize; 36] = [
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377,
    152, 148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

/// A single landmark in normalized image coordinates (x, y in [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    fn distance(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Detector output for the single tracked face in a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
    /// 4×4 facial transformation matrix; element `k` is `m[k / 4][k % 4]`.
    #[serde(default)]
    pub transform: Option<[f32; 16]>,
    /// Smile expression score in [0, 1].
    #[serde(default)]
    pub smile: Option<f32>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self {
            points,
            transform: None,
            smile: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A synthetic face centred in the frame, iris centres `eye_distance`
    /// apart, oriented by `pose` through the transformation matrix.
    ///
    /// Used to script detectors for simulation and replay.
    pub fn synthetic(layout: &LandmarkLayout, pose: HeadPose, eye_distance: f32) -> Self {
        let named = [
            layout.left_iris,
            layout.right_iris,
            layout.left_eye_outer,
            layout.right_eye_outer,
            layout.nose_tip,
            layout.chin,
            layout.forehead,
        ];
        let len = named
            .iter()
            .chain(layout.outline)
            .max()
            .map_or(0, |&m| m + 1);

        let mut points = vec![Landmark::new(0.5, 0.5); len];
        for (k, &idx) in layout.outline.iter().enumerate() {
            let t = k as f32 / layout.outline.len() as f32 * std::f32::consts::TAU;
            points[idx] = Landmark::new(0.5 + 0.2 * t.sin(), 0.5 - 0.25 * t.cos());
        }
        let half = eye_distance / 2.0;
        points[layout.left_iris] = Landmark::new(0.5 + half, 0.4);
        points[layout.right_iris] = Landmark::new(0.5 - half, 0.4);
        points[layout.left_eye_outer] = Landmark::new(0.5 + half * 1.6, 0.4);
        points[layout.right_eye_outer] = Landmark::new(0.5 - half * 1.6, 0.4);
        points[layout.nose_tip] = Landmark::new(0.5, 0.5);
        points[layout.forehead] = Landmark::new(0.5, 0.25);
        points[layout.chin] = Landmark::new(0.5, 0.75);

        Self {
            points,
            transform: Some(pose.to_matrix()),
            smile: None,
        }
    }

    pub fn point(&self, idx: usize) -> Option<&Landmark> {
        self.points.get(idx)
    }

    /// Normalized bounds of the landmarks at `indices`.
    ///
    /// Out-of-range indices are ignored; if none of them resolve, the bounds
    /// of every point are used. `None` only when there are no points at all.
    pub fn bounds(&self, indices: &[usize]) -> Option<NormalizedBox> {
        let selected: Vec<&Landmark> = indices.iter().filter_map(|&i| self.points.get(i)).collect();
        let pts: Vec<&Landmark> = if selected.is_empty() {
            self.points.iter().collect()
        } else {
            selected
        };
        let first = pts.first()?;

        let mut b = NormalizedBox::new(first.x, first.y, first.x, first.y);
        for p in &pts[1..] {
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        Some(b)
    }
}

/// Which landmark indices carry which meaning for a given detector model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkLayout {
    /// Face outline, used for the crop region.
    pub outline: &'static [usize],
    pub left_iris: usize,
    pub right_iris: usize,
    pub left_eye_outer: usize,
    pub right_eye_outer: usize,
    pub nose_tip: usize,
    pub chin: usize,
    pub forehead: usize,
}

impl LandmarkLayout {
    /// MediaPipe FaceLandmarker, 478 points including irises.
    pub const MEDIAPIPE_478: LandmarkLayout = LandmarkLayout {
        outline: &MEDIAPIPE_FACE_OVAL,
        left_iris: 473,
        right_iris: 468,
        left_eye_outer: 263,
        right_eye_outer: 33,
        nose_tip: 1,
        chin: 152,
        forehead: 10,
    };
}

impl Default for LandmarkLayout {
    fn default() -> Self {
        Self::MEDIAPIPE_478
    }
}

/// Head orientation in degrees. Positive pitch is chin up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl HeadPose {
    /// Decompose a rotation matrix into Euler angles (x = pitch, y = yaw,
    /// z = roll), handling gimbal lock.
    pub fn from_matrix(m: &[f32; 16]) -> Self {
        let (m00, m10) = (m[0], m[4]);
        let (m11, m12) = (m[5], m[6]);
        let (m20, m21, m22) = (m[8], m[9], m[10]);

        let sy = (m00 * m00 + m10 * m10).sqrt();
        let (x, y, z) = if sy >= 1e-6 {
            (m21.atan2(m22), (-m20).atan2(sy), m10.atan2(m00))
        } else {
            ((-m12).atan2(m11), (-m20).atan2(sy), 0.0)
        };

        Self {
            pitch: x.to_degrees(),
            yaw: y.to_degrees(),
            roll: z.to_degrees(),
        }
    }

    /// Rough orientation from 2D landmark geometry, for detectors that do
    /// not report a transformation matrix.
    ///
    /// Roll is the eye-line angle. Yaw is the nose offset along the eye line
    /// relative to half the eye span. Pitch compares the forehead→nose and
    /// nose→chin lengths.
    pub fn estimate(face: &FaceLandmarks, layout: &LandmarkLayout) -> Option<Self> {
        let right_eye = face.point(layout.right_eye_outer)?;
        let left_eye = face.point(layout.left_eye_outer)?;
        let nose = face.point(layout.nose_tip)?;
        let chin = face.point(layout.chin)?;
        let forehead = face.point(layout.forehead)?;

        let (ex, ey) = (left_eye.x - right_eye.x, left_eye.y - right_eye.y);
        let span = (ex * ex + ey * ey).sqrt();
        if span < 1e-6 {
            return None;
        }
        let roll = ey.atan2(ex).to_degrees();

        let mid = Landmark::new((left_eye.x + right_eye.x) / 2.0, (left_eye.y + right_eye.y) / 2.0);
        let along = ((nose.x - mid.x) * ex + (nose.y - mid.y) * ey) / span;
        let yaw = (along / (span / 2.0)).clamp(-1.0, 1.0).asin().to_degrees();

        let upper = forehead.distance(nose);
        let lower = nose.distance(chin);
        let pitch = if upper + lower > 1e-6 {
            ((lower - upper) / (upper + lower)).clamp(-1.0, 1.0).asin().to_degrees()
        } else {
            0.0
        };

        Some(Self { yaw, pitch, roll })
    }

    /// Row-major rotation matrix `Rz(roll) · Ry(yaw) · Rx(pitch)`, the
    /// inverse of [`HeadPose::from_matrix`].
    pub fn to_matrix(&self) -> [f32; 16] {
        let (sx, cx) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        let (sz, cz) = self.roll.to_radians().sin_cos();
        #[rustfmt::skip]
        let m = [
            cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx, 0.0,
            sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx, 0.0,
            -sy,     cy * sx,                cy * cx,                0.0,
            0.0,     0.0,                    0.0,                    1.0,
        ];
        m
    }
}

/// Everything the pose predicates look at for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceFeatures {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    /// Normalized distance between the iris centres (a proxy for camera distance).
    pub eye_distance: f32,
    pub smile: f32,
}

impl FaceFeatures {
    /// Derive features, preferring the detector's transformation matrix.
    ///
    /// Returns `None` when the landmark set is too sparse for this layout.
    pub fn extract(face: &FaceLandmarks, layout: &LandmarkLayout) -> Option<Self> {
        let pose = match &face.transform {
            Some(m) => HeadPose::from_matrix(m),
            None => HeadPose::estimate(face, layout)?,
        };

        let eye_distance = match (face.point(layout.left_iris), face.point(layout.right_iris)) {
            (Some(l), Some(r)) => l.distance(r),
            _ => {
                let l = face.point(layout.left_eye_outer)?;
                let r = face.point(layout.right_eye_outer)?;
                l.distance(r)
            }
        };

        Some(Self {
            yaw: pose.yaw,
            pitch: pose.pitch,
            roll: pose.roll,
            eye_distance,
            smile: face.smile.unwrap_or(0.0),
        })
    }
}
