use thiserror::Error;

/// Failures raised while bringing up or running a scan session.
///
/// Every variant maps to one of two short user notices; nothing here is
/// fatal to the process.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("camera permission denied")]
    PermissionDenied,

    /// The camera source failed to begin capturing for any platform
    /// reason (hardware busy, device missing, invalid surface).
    #[error("camera failed to start")]
    CameraStart(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanError {
    pub fn camera_start(err: impl Into<anyhow::Error>) -> Self {
        ScanError::CameraStart(err.into())
    }

    /// Short transient text shown to the user for this failure.
    pub fn user_notice(&self) -> &'static str {
        match self {
            ScanError::PermissionDenied => "Permission denied.",
            ScanError::CameraStart(_) | ScanError::Other(_) => "Something went wrong.",
        }
    }
}
