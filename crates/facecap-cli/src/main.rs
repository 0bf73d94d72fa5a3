use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecap_core::{
    FaceLandmarks, FrameExtractor, HeadPose, LandmarkLayout, ManualDetector, ManualDetectorHandle,
    NormalizedBox, PoseSpec, PoseTemplate, QualityAnalyzer,
};
use facecap_engine::{
    spawn_engine, DirectorySink, EngineConfig, EngineEvent, EngineStatus, UploadSink,
};
use facecap_frame::{Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

#[derive(Parser)]
#[command(name = "facecap", about = "Pose-gated face capture tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score brightness and sharpness of an image
    Score {
        image: PathBuf,
        /// Region to meter brightness in, as normalized x0,y0,x1,y1
        #[arg(long, value_parser = parse_roi)]
        roi: Option<NormalizedBox>,
    },
    /// Crop an image to a face given its landmarks
    Crop {
        image: PathBuf,
        /// JSON file with the detector's landmarks
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Output PNG path
        #[arg(short, long)]
        out: PathBuf,
        /// Encode the full frame instead of cropping
        #[arg(long)]
        no_crop: bool,
    },
    /// List the poses of a template
    Poses {
        /// Template file (defaults to $FACECAP_TEMPLATE or the built-in six poses)
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// Run a capture session against synthetic frames and print its events
    Simulate {
        #[arg(short, long)]
        template: Option<PathBuf>,
        /// Write the finished session to this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Include per-tick progress events in the output
        #[arg(long)]
        progress: bool,
    },
}

fn parse_roi(s: &str) -> Result<NormalizedBox, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in roi: {e}"))?;
    match parts.as_slice() {
        &[x0, y0, x1, y1] if x0 < x1 && y0 < y1 => Ok(NormalizedBox::new(x0, y0, x1, y1)),
        &[_, _, _, _] => Err("roi must satisfy x0 < x1 and y0 < y1".into()),
        _ => Err("roi needs four values: x0,y0,x1,y1".into()),
    }
}

fn load_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Frame::from_dynamic_image(&img)?)
}

fn load_config(template: Option<PathBuf>) -> Result<(EngineConfig, PoseTemplate)> {
    let mut config = EngineConfig::from_env();
    if template.is_some() {
        config.template_path = template;
    }
    let template = config.template()?;
    Ok((config, template))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score { image, roi } => {
            let config = EngineConfig::from_env();
            let frame = load_frame(&image)?;
            let analyzer = QualityAnalyzer::new(config.tuning.thresholds(), config.analysis_size);
            let reading = analyzer.analyze(&frame, roi.as_ref());
            println!("{}", serde_json::to_string_pretty(&reading)?);
        }
        Commands::Crop {
            image,
            landmarks,
            out,
            no_crop,
        } => {
            let frame = load_frame(&image)?;
            let json = std::fs::read_to_string(&landmarks)
                .with_context(|| format!("failed to read {}", landmarks.display()))?;
            let face = FaceLandmarks::from_json(&json).context("invalid landmarks file")?;
            let still = FrameExtractor::new(LandmarkLayout::default(), !no_crop)
                .extract(&frame, Some(&face))?;
            std::fs::write(&out, &still.png)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "{}",
                serde_json::json!({
                    "out": out.display().to_string(),
                    "width": still.width,
                    "height": still.height,
                    "cropped": still.cropped,
                })
            );
        }
        Commands::Poses { template } => {
            let (_, template) = load_config(template)?;
            for (i, pose) in template.poses.iter().enumerate() {
                let c = &pose.criteria;
                println!(
                    "{:>2}  {:<16} yaw {:>6.1}  pitch {:>6.1}  smile {:<5}  {}",
                    i,
                    pose.id.as_str(),
                    c.yaw,
                    c.pitch,
                    c.require_smile,
                    pose.title
                );
            }
        }
        Commands::Simulate {
            template,
            out,
            progress,
        } => {
            let (config, template) = load_config(template)?;
            simulate(config, template, out, progress).await?;
        }
    }

    Ok(())
}

/// Synthetic face that satisfies `spec` in a landscape frame.
fn face_for(spec: &PoseSpec) -> FaceLandmarks {
    let c = &spec.criteria;
    let pose = HeadPose {
        yaw: c.yaw,
        pitch: c.pitch,
        roll: c.roll,
    };
    let mut face =
        FaceLandmarks::synthetic(&LandmarkLayout::default(), pose, c.eye_distance.landscape);
    if c.require_smile {
        face.smile = Some(1.0);
    }
    face
}

/// Bright, high-contrast test card.
fn test_card(width: u32, height: u32) -> Result<Frame> {
    let data = (0..width * height)
        .map(|i| if ((i % width) / 16 + (i / width) / 16) % 2 == 0 { 70 } else { 250 })
        .collect();
    Ok(Frame::new(data, width, height, PixelFormat::Gray8)?)
}

async fn simulate(
    config: EngineConfig,
    template: PoseTemplate,
    out: Option<PathBuf>,
    show_progress: bool,
) -> Result<()> {
    let poses = template.poses.clone();
    let budget = Duration::from_millis(
        (config.tuning.hold_ms + config.tuning.transition_ms + config.tuning.poll_ms)
            * poses.len() as u64
            + 5_000,
    );

    let (detector, script) = ManualDetector::new();
    let (frames_tx, frames_rx) = watch::channel(None);
    let sink = out.map(|dir| Box::new(DirectorySink::new(dir)) as Box<dyn UploadSink>);
    let handle = spawn_engine(config, template, Box::new(detector), frames_rx, sink);
    let mut events = handle.subscribe();

    if let Some(first) = poses.first() {
        script.set_face(Some(face_for(first)));
    }
    let card = Arc::new(test_card(320, 240)?);
    let feeder = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(33));
        loop {
            interval.tick().await;
            if frames_tx.send(Some(card.clone())).is_err() {
                break;
            }
        }
    });

    let run = follow_session(&mut events, &script, &poses, show_progress);

    let result = match tokio::time::timeout(budget, run).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("session did not complete within {budget:?}")),
    };

    feeder.abort();
    handle.shutdown().await?;
    result
}

/// Print events and move the scripted face on to the next pose after
/// each commit, until the session completes.
async fn follow_session(
    events: &mut broadcast::Receiver<EngineEvent>,
    script: &ManualDetectorHandle,
    poses: &[PoseSpec],
    show_progress: bool,
) -> Result<()> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event output fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => bail!("engine stopped unexpectedly"),
        };

        if show_progress || !matches!(event, EngineEvent::Progress { .. }) {
            println!("{}", serde_json::to_string(&event)?);
        }

        match event {
            EngineEvent::Commit { index, .. } => {
                script.set_face(poses.get(index + 1).map(face_for));
            }
            EngineEvent::Complete { .. } => return Ok(()),
            EngineEvent::Status {
                status: EngineStatus::Fault(code),
            } => bail!("engine fault: {code:?}"),
            _ => {}
        }
    }
}
