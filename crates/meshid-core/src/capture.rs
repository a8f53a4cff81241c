//! Image capture state machine: file upload or live camera.
//!
//! ```text
//! Idle ──select_mode──▶ Upload:  AwaitingFile ──select_file──▶ FilePreviewed ──clear──▶ AwaitingFile
//!                       Camera:  RequestingPermission ──start_camera──▶ StreamActive | PermissionDenied
//!                                StreamActive ──capture──▶ Captured ──retake──▶ StreamActive
//! ```
//!
//! The camera stream is held by a [`StreamGuard`] stored inside the camera
//! states, so it is stopped exactly once whenever those states are left:
//! mode switch, [`CaptureController::stop`], or the controller being dropped.
//!
//! After an image is emitted the controller is disarmed until the caller
//! calls [`CaptureController::acknowledge`] (or abandons the image through
//! clear, retake, or a mode switch).

use crate::types::ImageBlob;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),
    #[error("previous capture is still being processed")]
    Busy,
    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: CapturePhase,
    },
}

/// Source of live camera streams.
pub trait CameraProvider {
    type Stream: CameraStream;

    /// Request access to the camera and start streaming.
    fn acquire(&mut self) -> Result<Self::Stream, CaptureError>;
}

/// A live camera stream.
pub trait CameraStream {
    /// Grab the current frame as an encoded still.
    fn snapshot(&mut self) -> Result<ImageBlob, CaptureError>;

    /// Stop all tracks. Called exactly once, by [`StreamGuard`].
    fn stop(&mut self);
}

/// Owns a camera stream and stops it when dropped.
pub struct StreamGuard<S: CameraStream> {
    stream: Option<S>,
}

impl<S: CameraStream> StreamGuard<S> {
    fn new(stream: S) -> Self {
        tracing::info!("camera stream acquired");
        Self {
            stream: Some(stream),
        }
    }

    fn snapshot(&mut self) -> Result<ImageBlob, CaptureError> {
        match self.stream.as_mut() {
            Some(stream) => stream.snapshot(),
            None => Err(CaptureError::DeviceUnavailable("stream already stopped".into())),
        }
    }
}

impl<S: CameraStream> Drop for StreamGuard<S> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!("camera stream released");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Upload,
    Camera,
}

/// Flat view of the current state, for display and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    AwaitingFile,
    FilePreviewed,
    RequestingPermission,
    StreamActive,
    Captured,
    PermissionDenied,
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapturePhase::Idle => "idle",
            CapturePhase::AwaitingFile => "awaiting a file",
            CapturePhase::FilePreviewed => "previewing a file",
            CapturePhase::RequestingPermission => "requesting camera permission",
            CapturePhase::StreamActive => "streaming",
            CapturePhase::Captured => "showing a captured still",
            CapturePhase::PermissionDenied => "camera permission denied",
        })
    }
}

enum UploadState {
    AwaitingFile,
    FilePreviewed { preview: ImageBlob },
}

enum CameraState<S: CameraStream> {
    RequestingPermission,
    StreamActive { stream: StreamGuard<S> },
    Captured { stream: StreamGuard<S>, still: ImageBlob },
    PermissionDenied { error: CaptureError },
}

enum CaptureState<S: CameraStream> {
    Idle,
    Upload(UploadState),
    Camera(CameraState<S>),
}

pub struct CaptureController<P: CameraProvider> {
    provider: P,
    state: CaptureState<P::Stream>,
    awaiting_ack: bool,
}

impl<P: CameraProvider> CaptureController<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: CaptureState::Idle,
            awaiting_ack: false,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        match &self.state {
            CaptureState::Idle => CapturePhase::Idle,
            CaptureState::Upload(UploadState::AwaitingFile) => CapturePhase::AwaitingFile,
            CaptureState::Upload(UploadState::FilePreviewed { .. }) => CapturePhase::FilePreviewed,
            CaptureState::Camera(CameraState::RequestingPermission) => {
                CapturePhase::RequestingPermission
            }
            CaptureState::Camera(CameraState::StreamActive { .. }) => CapturePhase::StreamActive,
            CaptureState::Camera(CameraState::Captured { .. }) => CapturePhase::Captured,
            CaptureState::Camera(CameraState::PermissionDenied { .. }) => {
                CapturePhase::PermissionDenied
            }
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.state {
            CaptureState::Idle => None,
            CaptureState::Upload(_) => Some(Mode::Upload),
            CaptureState::Camera(_) => Some(Mode::Camera),
        }
    }

    /// The still currently shown, if any.
    pub fn preview(&self) -> Option<&ImageBlob> {
        match &self.state {
            CaptureState::Upload(UploadState::FilePreviewed { preview }) => Some(preview),
            CaptureState::Camera(CameraState::Captured { still, .. }) => Some(still),
            _ => None,
        }
    }

    /// The error that put the camera into `PermissionDenied`.
    pub fn camera_error(&self) -> Option<&CaptureError> {
        match &self.state {
            CaptureState::Camera(CameraState::PermissionDenied { error }) => Some(error),
            _ => None,
        }
    }

    pub fn holds_camera(&self) -> bool {
        matches!(
            self.state,
            CaptureState::Camera(CameraState::StreamActive { .. } | CameraState::Captured { .. })
        )
    }

    /// Whether a capture action would currently be accepted.
    pub fn is_armed(&self) -> bool {
        !self.awaiting_ack
    }

    /// Switch modality. Always releases a held camera, drops any preview and
    /// enters the first state of the new mode, even when `mode` is unchanged.
    pub fn select_mode(&mut self, mode: Mode) {
        // Replacing the state drops any StreamGuard it owned.
        self.state = match mode {
            Mode::Upload => CaptureState::Upload(UploadState::AwaitingFile),
            Mode::Camera => CaptureState::Camera(CameraState::RequestingPermission),
        };
        self.awaiting_ack = false;
        tracing::info!(?mode, "capture mode selected");
    }

    /// Ask the provider for the camera. Valid from `RequestingPermission`, or
    /// from `PermissionDenied` to retry.
    pub fn start_camera(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::Camera(
                CameraState::RequestingPermission | CameraState::PermissionDenied { .. },
            ) => {}
            _ => return Err(self.invalid("start the camera")),
        }

        match self.provider.acquire() {
            Ok(stream) => {
                self.state = CaptureState::Camera(CameraState::StreamActive {
                    stream: StreamGuard::new(stream),
                });
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "camera acquisition failed");
                self.state = CaptureState::Camera(CameraState::PermissionDenied {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Accept a chosen file. Emits the image and moves to `FilePreviewed`.
    pub fn select_file(&mut self, image: ImageBlob) -> Result<ImageBlob, CaptureError> {
        self.ensure_armed()?;
        if !matches!(self.state, CaptureState::Upload(UploadState::AwaitingFile)) {
            return Err(self.invalid("select a file"));
        }

        self.state = CaptureState::Upload(UploadState::FilePreviewed {
            preview: image.clone(),
        });
        self.awaiting_ack = true;
        tracing::debug!(file = %image.file_name, bytes = image.bytes.len(), "file selected");
        Ok(image)
    }

    /// Snapshot the live stream. Emits the still and moves to `Captured`; the
    /// stream stays held. A failed snapshot leaves the stream active.
    pub fn capture(&mut self) -> Result<ImageBlob, CaptureError> {
        self.ensure_armed()?;
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Camera(CameraState::StreamActive { mut stream }) => {
                match stream.snapshot() {
                    Ok(still) => {
                        tracing::debug!(bytes = still.bytes.len(), "still captured");
                        self.state = CaptureState::Camera(CameraState::Captured {
                            stream,
                            still: still.clone(),
                        });
                        self.awaiting_ack = true;
                        Ok(still)
                    }
                    Err(error) => {
                        self.state = CaptureState::Camera(CameraState::StreamActive { stream });
                        Err(error)
                    }
                }
            }
            other => {
                self.state = other;
                Err(self.invalid("capture"))
            }
        }
    }

    /// Discard the uploaded preview and wait for another file.
    pub fn clear(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, CaptureState::Upload(_)) {
            return Err(self.invalid("clear"));
        }
        self.state = CaptureState::Upload(UploadState::AwaitingFile);
        self.awaiting_ack = false;
        Ok(())
    }

    /// Discard the captured still and return to the live stream.
    pub fn retake(&mut self) -> Result<(), CaptureError> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Camera(CameraState::Captured { stream, .. }) => {
                self.state = CaptureState::Camera(CameraState::StreamActive { stream });
                self.awaiting_ack = false;
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("retake"))
            }
        }
    }

    /// The consumer finished processing the last emitted image.
    pub fn acknowledge(&mut self) {
        self.awaiting_ack = false;
    }

    /// Leave the current mode, releasing any held camera.
    pub fn stop(&mut self) {
        self.state = CaptureState::Idle;
        self.awaiting_ack = false;
    }

    fn ensure_armed(&self) -> Result<(), CaptureError> {
        if self.awaiting_ack {
            Err(CaptureError::Busy)
        } else {
            Ok(())
        }
    }

    fn invalid(&self, action: &'static str) -> CaptureError {
        CaptureError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Shared counters so tests can observe the camera after the controller
    /// took ownership of the provider.
    #[derive(Default)]
    pub struct CameraStats {
        pub acquired: Cell<usize>,
        pub stopped: Cell<usize>,
        pub snapshots: Cell<usize>,
    }

    pub struct FakeCamera {
        pub stats: Rc<CameraStats>,
        pub deny: bool,
    }

    impl FakeCamera {
        pub fn new() -> (Self, Rc<CameraStats>) {
            let stats = Rc::new(CameraStats::default());
            (
                Self {
                    stats: Rc::clone(&stats),
                    deny: false,
                },
                stats,
            )
        }
    }

    pub struct FakeStream {
        stats: Rc<CameraStats>,
    }

    impl CameraProvider for FakeCamera {
        type Stream = FakeStream;

        fn acquire(&mut self) -> Result<FakeStream, CaptureError> {
            if self.deny {
                return Err(CaptureError::PermissionDenied("user declined".into()));
            }
            self.stats.acquired.set(self.stats.acquired.get() + 1);
            Ok(FakeStream {
                stats: Rc::clone(&self.stats),
            })
        }
    }

    impl CameraStream for FakeStream {
        fn snapshot(&mut self) -> Result<ImageBlob, CaptureError> {
            let n = self.stats.snapshots.get() + 1;
            self.stats.snapshots.set(n);
            Ok(ImageBlob::new(vec![n as u8], "camera_capture.jpg", "image/jpeg"))
        }

        fn stop(&mut self) {
            self.stats.stopped.set(self.stats.stopped.get() + 1);
        }
    }
}
