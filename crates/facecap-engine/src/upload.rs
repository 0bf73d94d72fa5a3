//! Hand-off of a finished capture session.
//!
//! Upload, storage and auth live outside the engine; a sink only receives
//! the ordered images once, when the last pose commits.

use crate::sequence::CompletedSession;
use chrono::{DateTime, Utc};
use facecap_core::PoseId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload receiver dropped")]
    Closed,
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pose id {0:?} cannot be used as a file name")]
    UnsafePoseId(PoseId),
    #[error("failed to encode manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub trait UploadSink: Send {
    fn deliver(&mut self, session: &CompletedSession) -> Result<(), UploadError>;
}

/// Forwards completed sessions to an async consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CompletedSession>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletedSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UploadSink for ChannelSink {
    fn deliver(&mut self, session: &CompletedSession) -> Result<(), UploadError> {
        self.tx
            .send(session.clone())
            .map_err(|_| UploadError::Closed)
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    session_id: Uuid,
    completed_at: DateTime<Utc>,
    images: Vec<ManifestEntry<'a>>,
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    pose_id: &'a str,
    file: String,
    width: u32,
    height: u32,
    cropped: bool,
    captured_at: DateTime<Utc>,
}

/// Writes `<root>/<session id>/<pose_id>.png` plus a `manifest.json`.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), UploadError> {
    std::fs::write(path, bytes).map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl UploadSink for DirectorySink {
    fn deliver(&mut self, session: &CompletedSession) -> Result<(), UploadError> {
        if let Some(bad) = session.images.iter().find(|c| !c.pose_id.is_file_safe()) {
            return Err(UploadError::UnsafePoseId(bad.pose_id.clone()));
        }
        let dir = self.session_dir(session.id);
        std::fs::create_dir_all(&dir).map_err(|source| UploadError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut entries = Vec::with_capacity(session.images.len());
        for captured in &session.images {
            let file = format!("{}.png", captured.pose_id);
            write(&dir.join(&file), &captured.image.png)?;
            entries.push(ManifestEntry {
                pose_id: captured.pose_id.as_str(),
                file,
                width: captured.image.width,
                height: captured.image.height,
                cropped: captured.image.cropped,
                captured_at: captured.captured_at,
            });
        }

        let manifest = Manifest {
            session_id: session.id,
            completed_at: session.completed_at,
            images: entries,
        };
        write(
            &dir.join("manifest.json"),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;

        tracing::info!(
            session = %session.id,
            dir = %dir.display(),
            images = session.images.len(),
            "session written to disk"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::CapturedImage;
    use facecap_core::StillImage;

    fn completed() -> CompletedSession {
        let image = |id: &str| CapturedImage {
            pose_id: PoseId::from(id),
            image: StillImage {
                png: id.as_bytes().to_vec(),
                width: 2,
                height: 3,
                cropped: true,
            },
            captured_at: Utc::now(),
        };
        CompletedSession {
            id: Uuid::new_v4(),
            images: vec![image("front"), image("left_45")],
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_sink() {
        let (mut sink, mut rx) = ChannelSink::new();
        let session = completed();
        sink.deliver(&session).unwrap();
        let got = rx.try_recv().unwrap();
        assert_eq!(got.id, session.id);
        assert_eq!(got.images.len(), 2);

        drop(rx);
        assert!(matches!(sink.deliver(&session), Err(UploadError::Closed)));
    }

    #[test]
    fn test_directory_sink_writes_files() {
        let root = std::env::temp_dir().join(format!("facecap-sink-{}", Uuid::new_v4()));
        let mut sink = DirectorySink::new(&root);
        let session = completed();
        sink.deliver(&session).unwrap();

        let dir = sink.session_dir(session.id);
        assert_eq!(std::fs::read(dir.join("front.png")).unwrap(), b"front");
        assert_eq!(std::fs::read(dir.join("left_45.png")).unwrap(), b"left_45");

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["images"][1]["pose_id"], "left_45");
        assert_eq!(manifest["images"][0]["file"], "front.png");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_directory_sink_refuses_path_like_ids() {
        let root = std::env::temp_dir().join(format!("facecap-sink-{}", Uuid::new_v4()));
        let mut sink = DirectorySink::new(&root);
        let mut session = completed();
        session.images[1].pose_id = PoseId::from("../escape");

        assert!(matches!(
            sink.deliver(&session),
            Err(UploadError::UnsafePoseId(id)) if id.as_str() == "../escape"
        ));
        assert!(!root.exists());
    }
}
