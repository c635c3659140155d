//! Concrete landmark detectors.
//!
//! Both speak the same JSON-lines protocol, one message per line:
//!
//! ```text
//! {"ready": true}
//! {"width": 1280, "height": 720, "hands": [[[0.51, 0.62, -0.01], ...21 points]]}
//! {"error": "camera", "message": "permission denied"}
//! ```
//!
//! Points may also be objects (`{"x": .., "y": .., "z": ..}`). Width and
//! height are optional and fall back to the configured frame size.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::DetectorConfig;
use crate::error::{CaptureError, Result};
use crate::landmarks::{Landmark, LandmarkFrame};
use crate::source::{Detection, LandmarkDetector};

// ============================================================================
// Protocol
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FailureKind {
    Camera,
    Detector,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PointMessage {
    Triple([f32; 3]),
    Object {
        x: f32,
        y: f32,
        #[serde(default)]
        z: f32,
    },
}

impl From<PointMessage> for Landmark {
    fn from(point: PointMessage) -> Self {
        match point {
            PointMessage::Triple(xyz) => Self::from(xyz),
            PointMessage::Object { x, y, z } => Self::new(x, y, z),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectorMessage {
    Failure {
        error: FailureKind,
        #[serde(default)]
        message: String,
    },
    Ready {
        #[allow(dead_code)]
        ready: bool,
    },
    Detection {
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        hands: Vec<Vec<PointMessage>>,
    },
}

/// A decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
enum LineEvent {
    Ready,
    Detection(Detection),
    Failure(FailureKind, String),
}

impl LineEvent {
    fn into_result(self) -> Result<Option<Detection>> {
        match self {
            Self::Detection(detection) => Ok(Some(detection)),
            Self::Failure(kind, message) => Err(failure(kind, message)),
            Self::Ready => Ok(None),
        }
    }
}

fn failure(kind: FailureKind, message: String) -> CaptureError {
    match kind {
        FailureKind::Camera => CaptureError::camera(message),
        FailureKind::Detector => CaptureError::detector(message),
    }
}

/// Decodes one line. Blank lines decode to `None`; hands with the wrong
/// number of points are dropped.
fn parse_line(line: &str, frame_width: u32, frame_height: u32) -> Result<Option<LineEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let message: DetectorMessage = serde_json::from_str(line)?;
    let event = match message {
        DetectorMessage::Failure { error, message } => LineEvent::Failure(error, message),
        DetectorMessage::Ready { .. } => LineEvent::Ready,
        DetectorMessage::Detection {
            width,
            height,
            hands,
        } => {
            let hands = hands
                .into_iter()
                .filter_map(|points| {
                    LandmarkFrame::new(points.into_iter().map(Landmark::from).collect())
                        .map_err(|e| warn!(error = %e, "Dropping malformed hand"))
                        .ok()
                })
                .collect();
            LineEvent::Detection(Detection {
                frame_width: width.unwrap_or(frame_width),
                frame_height: height.unwrap_or(frame_height),
                hands,
            })
        }
    };
    Ok(Some(event))
}

// ============================================================================
// ProcessDetector
// ============================================================================

/// Runs an external detector program and reads its stdout.
///
/// The program owns the camera; killing it releases the camera.
#[derive(Debug)]
pub struct ProcessDetector {
    command: String,
    args: Vec<String>,
    frame_width: u32,
    frame_height: u32,
    child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    pending: Option<Detection>,
}

impl ProcessDetector {
    /// Runs `command` with no arguments and a 1280x720 frame.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            frame_width: 1280,
            frame_height: 720,
            child: None,
            lines: None,
            pending: None,
        }
    }

    /// Builds a detector from the `detector` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Detector`] if no command is configured.
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let command = config.command.clone().ok_or_else(|| {
            CaptureError::detector("no detector command configured (set detector.command or use --replay)")
        })?;
        Ok(Self::new(command)
            .with_args(config.args.clone())
            .with_frame_size(config.frame_width, config.frame_height))
    }

    /// Sets the arguments passed to the command.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the frame size reported with each detection.
    #[must_use]
    pub const fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    async fn read_event(&mut self) -> Result<Option<LineEvent>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line, self.frame_width, self.frame_height) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Skipping unreadable detector line"),
            }
        }
        Ok(None)
    }

    async fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await.ok(),
            None => None,
        }
    }
}

impl LandmarkDetector for ProcessDetector {
    #[instrument(skip(self), fields(command = %self.command))]
    async fn initialize(&mut self) -> Result<()> {
        self.release().await;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::detector(format!("cannot start '{}': {e}", self.command)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::detector("detector stdout is not captured"))?;
        self.lines = Some(BufReader::new(stdout).lines());
        self.child = Some(child);

        match self.read_event().await? {
            Some(LineEvent::Ready) => {}
            Some(LineEvent::Detection(detection)) => self.pending = Some(detection),
            Some(LineEvent::Failure(kind, message)) => {
                self.release().await;
                return Err(failure(kind, message));
            }
            None => {
                let status = self.exit_status().await;
                self.release().await;
                return Err(CaptureError::detector(format!(
                    "detector exited before it was ready ({})",
                    status.map_or_else(|| "unknown status".to_string(), |s| s.to_string())
                )));
            }
        }
        info!("Detector process ready");
        Ok(())
    }

    async fn next_detection(&mut self) -> Result<Option<Detection>> {
        if let Some(detection) = self.pending.take() {
            return Ok(Some(detection));
        }
        loop {
            match self.read_event().await? {
                Some(LineEvent::Ready) => {}
                Some(event) => return event.into_result(),
                None => {
                    return match self.exit_status().await {
                        Some(status) if !status.success() => Err(CaptureError::detector(
                            format!("detector exited with {status}"),
                        )),
                        _ => Ok(None),
                    };
                }
            }
        }
    }

    async fn release(&mut self) {
        self.lines = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Detector process already gone");
            }
        }
    }
}

// ============================================================================
// ReplayDetector
// ============================================================================

/// Plays back a JSON-lines recording at a fixed frame rate.
#[derive(Debug)]
pub struct ReplayDetector {
    path: PathBuf,
    frame_interval: Duration,
    looping: bool,
    frame_width: u32,
    frame_height: u32,
    events: Vec<LineEvent>,
    cursor: usize,
    ticker: Option<Interval>,
}

impl ReplayDetector {
    /// Replays `path` at 30 frames per second, once.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame_interval: Duration::from_millis(33),
            looping: false,
            frame_width: 1280,
            frame_height: 720,
            events: Vec::new(),
            cursor: 0,
            ticker: None,
        }
    }

    /// Sets the playback rate. Zero is treated as one.
    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.frame_interval = Duration::from_secs(1) / fps.max(1);
        self
    }

    /// Restarts from the first frame when the recording ends.
    #[must_use]
    pub const fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Frame size for lines that do not carry one.
    #[must_use]
    pub const fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Recording file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames in the loaded recording.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if no recording is loaded or it has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl LandmarkDetector for ReplayDetector {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn initialize(&mut self) -> Result<()> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CaptureError::camera(format!("cannot open recording '{}': {e}", self.path.display()))
        })?;

        let mut events = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            match parse_line(line, self.frame_width, self.frame_height) {
                Ok(Some(LineEvent::Ready) | None) => {}
                Ok(Some(event)) => events.push(event),
                Err(e) => {
                    return Err(CaptureError::detector(format!(
                        "recording '{}' line {}: {e}",
                        self.path.display(),
                        index + 1
                    )))
                }
            }
        }

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.events = events;
        self.cursor = 0;
        self.ticker = Some(ticker);
        info!(frames = self.events.len(), "Recording loaded");
        Ok(())
    }

    async fn next_detection(&mut self) -> Result<Option<Detection>> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Ok(None);
        };
        ticker.tick().await;

        if self.cursor >= self.events.len() {
            if !self.looping || self.events.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let event = self.events[self.cursor].clone();
        self.cursor += 1;
        event.into_result()
    }

    async fn release(&mut self) {
        self.ticker = None;
        self.cursor = 0;
    }
}
