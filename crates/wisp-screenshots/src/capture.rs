//! Capture sources.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::debug;

use wisp_core::{CaptureError, CaptureSource, CapturedFrame};

/// Holds the most recent frame pushed by a client.
///
/// Each capture consumes the frame, so one pushed frame is stored at most
/// once.
#[derive(Debug, Default)]
pub struct PushedFrameCapture {
    latest: Mutex<Option<CapturedFrame>>,
}

impl PushedFrameCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a frame, replacing any frame not yet captured.
    pub fn push(&self, frame: CapturedFrame) {
        *self.latest.lock() = Some(frame);
    }

    pub fn has_frame(&self) -> bool {
        self.latest.lock().is_some()
    }
}

#[async_trait]
impl CaptureSource for PushedFrameCapture {
    async fn capture_pixels(&self) -> Result<CapturedFrame, CaptureError> {
        self.latest
            .lock()
            .take()
            .ok_or_else(|| CaptureError::Unavailable("no frame pushed since last capture".to_string()))
    }
}

/// How long a screenshot command may run before the capture fails.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs an external screenshot command and reads image bytes from stdout.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    media_type: String,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            media_type: "image/png".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }
}

#[async_trait]
impl CaptureSource for CommandCapture {
    async fn capture_pixels(&self) -> Result<CapturedFrame, CaptureError> {
        let run = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        // Dropping the future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                CaptureError::Unavailable(format!(
                    "{} timed out after {}ms",
                    self.program,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| CaptureError::Unavailable(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::Unavailable(format!(
                "{} produced no image data",
                self.program
            )));
        }

        debug!(program = %self.program, bytes = output.stdout.len(), "captured frame");
        Ok(CapturedFrame {
            bytes: output.stdout,
            media_type: self.media_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pushed_frame_is_consumed() {
        let capture = PushedFrameCapture::new();
        assert!(capture.capture_pixels().await.is_err());

        capture.push(CapturedFrame::png(vec![1, 2, 3]));
        capture.push(CapturedFrame::png(vec![4, 5, 6]));
        assert!(capture.has_frame());

        let frame = capture.capture_pixels().await.unwrap();
        assert_eq!(frame.bytes, vec![4, 5, 6]);
        assert!(matches!(
            capture.capture_pixels().await,
            Err(CaptureError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_reads_stdout() {
        let capture = CommandCapture::new("printf", vec!["PNGDATA".to_string()]);
        let frame = capture.capture_pixels().await.unwrap();
        assert_eq!(frame.bytes, b"PNGDATA");
        assert_eq!(frame.media_type, "image/png");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_failures() {
        let failing = CommandCapture::new("false", vec![]);
        assert!(matches!(
            failing.capture_pixels().await,
            Err(CaptureError::Unavailable(_))
        ));

        let silent = CommandCapture::new("true", vec![]);
        assert!(matches!(
            silent.capture_pixels().await,
            Err(CaptureError::Unavailable(_))
        ));

        let missing = CommandCapture::new("wisp-no-such-binary", vec![]);
        assert!(missing.capture_pixels().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_times_out() {
        let hung = CommandCapture::new("sh", vec!["-c".to_string(), "sleep 5".to_string()])
            .with_timeout(Duration::from_millis(100));

        let started = std::time::Instant::now();
        match hung.capture_pixels().await {
            Err(CaptureError::Unavailable(reason)) => assert!(reason.contains("timed out")),
            other => panic!("expected a timeout, got {:?}", other.map(|f| f.bytes.len())),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
