//! Capture session templates — the ordered list of poses to collect.
//!
//! Templates are TOML files with one `[[pose]]` table per step. The default
//! six-pose template is embedded at compile time from
//! `contrib/poses/default.toml`.

use crate::pose::PoseCriteria;
use crate::types::PoseId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

const BUILTIN_TEMPLATE: &str = include_str!("../../../contrib/poses/default.toml");

static BUILTIN: OnceLock<Result<PoseTemplate, String>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad template TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("template defines no poses")]
    Empty,
    #[error("pose id {0:?} cannot be used as a file name")]
    InvalidPoseId(PoseId),
    #[error("pose id {0} appears more than once")]
    DuplicatePose(PoseId),
    #[error("embedded template is invalid: {0}")]
    Builtin(String),
}

/// One required capture step. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSpec {
    pub id: PoseId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub criteria: PoseCriteria,
}

/// Ordered pose list for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseTemplate {
    #[serde(rename = "pose")]
    pub poses: Vec<PoseSpec>,
}

impl PoseTemplate {
    /// Parse and validate a template.
    pub fn from_toml_str(src: &str) -> Result<Self, TemplateError> {
        let template: PoseTemplate = toml::from_str(src)?;
        template.validate()?;
        Ok(template)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let src = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let template = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), poses = template.len(), "loaded pose template");
        Ok(template)
    }

    /// The embedded default template (front, left/right 45°, chin up/down,
    /// front smiling). Parsed once per process.
    pub fn builtin() -> Result<Self, TemplateError> {
        BUILTIN
            .get_or_init(|| Self::from_toml_str(BUILTIN_TEMPLATE).map_err(|e| e.to_string()))
            .clone()
            .map_err(TemplateError::Builtin)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn position(&self, id: &PoseId) -> Option<usize> {
        self.poses.iter().position(|p| &p.id == id)
    }

    fn validate(&self) -> Result<(), TemplateError> {
        if self.poses.is_empty() {
            return Err(TemplateError::Empty);
        }
        let mut seen = HashSet::new();
        for pose in &self.poses {
            if !pose.id.is_file_safe() {
                return Err(TemplateError::InvalidPoseId(pose.id.clone()));
            }
            if !seen.insert(&pose.id) {
                return Err(TemplateError::DuplicatePose(pose.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Axis;

    #[test]
    fn test_builtin_has_six_poses_in_order() {
        let t = PoseTemplate::builtin().unwrap();
        let ids: Vec<&str> = t.poses.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            ["front", "left_45", "right_45", "chin_up", "chin_down", "front_smiling"]
        );
        assert!(t.poses[5].criteria.require_smile);
        assert_eq!(t.poses[3].criteria.axes, vec![Axis::Pitch]);
        assert_eq!(t.position(&PoseId::from("chin_up")), Some(3));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let src = r#"
            [[pose]]
            id = "a"
            title = "A"
            criteria = { yaw = 0.0, pitch = 0.0, eye_distance = { landscape = 0.1, portrait = 0.2 } }

            [[pose]]
            id = "a"
            title = "A again"
            criteria = { yaw = 0.0, pitch = 0.0, eye_distance = { landscape = 0.1, portrait = 0.2 } }
        "#;
        assert!(matches!(
            PoseTemplate::from_toml_str(src),
            Err(TemplateError::DuplicatePose(id)) if id.as_str() == "a"
        ));
    }

    #[test]
    fn test_path_like_ids_rejected() {
        for bad in ["", "../x", "a/b", "a\\b", ".."] {
            let src = format!(
                r#"
                [[pose]]
                id = '{bad}'
                title = "Bad"
                criteria = {{ yaw = 0.0, pitch = 0.0, eye_distance = {{ landscape = 0.1, portrait = 0.2 }} }}
                "#
            );
            assert!(
                matches!(
                    PoseTemplate::from_toml_str(&src),
                    Err(TemplateError::InvalidPoseId(_))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(matches!(
            PoseTemplate::from_toml_str("pose = []"),
            Err(TemplateError::Empty)
        ));
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            PoseTemplate::from_toml_str("[[pose]]\nid = 3"),
            Err(TemplateError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PoseTemplate::load(Path::new("/nonexistent/facecap/poses.toml")).unwrap_err();
        assert!(matches!(err, TemplateError::Io { .. }));
    }
}
