//! Media device access
//!
//! The diagnostics only need a yes/no with a reason: can a capture device be
//! acquired right now? The [`MediaDevices`] trait is the seam; the system
//! implementation does a best-effort device-node check, and the scripted
//! implementation lets tests dictate outcomes.

use async_trait::async_trait;
use hearth_core::HearthError;
use std::sync::atomic::{AtomicU64, Ordering};

/// What the caller wants to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Request a microphone
    pub audio: bool,
    /// Request a camera
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Why a device acquisition did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFailure {
    /// The platform refused access
    PermissionDenied,
    /// No device satisfying the constraints exists
    NotFound,
    /// A device exists but another process holds it
    Busy,
    /// Devices exist but none match the constraints
    ConstraintsUnsatisfiable,
    /// Anything the other variants do not cover
    Unknown(String),
}

impl MediaFailure {
    /// Short user-facing description
    pub fn details(&self) -> String {
        match self {
            Self::PermissionDenied => "permission to use camera/microphone was denied".to_string(),
            Self::NotFound => "no camera or microphone was found".to_string(),
            Self::Busy => "camera or microphone is in use by another application".to_string(),
            Self::ConstraintsUnsatisfiable => {
                "no device satisfies the requested constraints".to_string()
            }
            Self::Unknown(message) => format!("media device error: {message}"),
        }
    }

    /// Map to the library error type for report slots
    pub fn into_error(self) -> HearthError {
        match self {
            Self::PermissionDenied => HearthError::permission_denied(self.details()),
            Self::NotFound => HearthError::not_found(self.details()),
            Self::Busy | Self::ConstraintsUnsatisfiable | Self::Unknown(_) => {
                HearthError::internal(self.details())
            }
        }
    }
}

/// Token for an acquired device set; pass back to `release`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHandle(pub u64);

/// Acquisition seam for capture devices
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Try to acquire devices matching `constraints`
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, MediaFailure>;

    /// Release a previously acquired handle; must be infallible
    async fn release(&self, handle: MediaHandle);
}

/// Best-effort system device check
///
/// Looks for capture device nodes rather than opening them for streaming;
/// opening is the application's job, this only answers the diagnostic
/// question.
#[derive(Debug, Default)]
pub struct SystemMediaDevices {
    next_handle: AtomicU64,
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, MediaFailure> {
        if !constraints.audio && !constraints.video {
            return Err(MediaFailure::ConstraintsUnsatisfiable);
        }

        if constraints.video {
            probe_device_dir("/dev", "video")?;
        }
        if constraints.audio {
            probe_snd_dir()?;
        }
        Ok(MediaHandle(self.next_handle.fetch_add(1, Ordering::Relaxed)))
    }

    async fn release(&self, _handle: MediaHandle) {}
}

/// Check `dir` for at least one entry whose name starts with `prefix`
fn probe_device_dir(dir: &str, prefix: &str) -> Result<(), MediaFailure> {
    let entries = std::fs::read_dir(dir).map_err(classify_io_failure)?;
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            return Ok(());
        }
    }
    Err(MediaFailure::NotFound)
}

fn probe_snd_dir() -> Result<(), MediaFailure> {
    match std::fs::read_dir("/dev/snd") {
        Ok(mut entries) => {
            if entries.next().is_some() {
                Ok(())
            } else {
                Err(MediaFailure::NotFound)
            }
        }
        Err(e) => Err(classify_io_failure(e)),
    }
}

fn classify_io_failure(e: std::io::Error) -> MediaFailure {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => MediaFailure::PermissionDenied,
        std::io::ErrorKind::NotFound => MediaFailure::NotFound,
        // EBUSY surfaces as a raw OS error, not a stable ErrorKind.
        _ if e.raw_os_error() == Some(16) => MediaFailure::Busy,
        _ => MediaFailure::Unknown(e.to_string()),
    }
}

/// Scripted implementation for tests and demos
///
/// Counts acquisitions and releases so callers can assert that every
/// successful acquire is paired with a release.
#[derive(Debug)]
pub struct ScriptedMediaDevices {
    outcome: Result<(), MediaFailure>,
    acquires: AtomicU64,
    releases: AtomicU64,
}

impl ScriptedMediaDevices {
    /// Always grants access
    pub fn granting() -> Self {
        Self {
            outcome: Ok(()),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Always fails with `failure`
    pub fn failing(failure: MediaFailure) -> Self {
        Self {
            outcome: Err(failure),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Number of acquire calls observed
    pub fn acquire_count(&self) -> u64 {
        self.acquires.load(Ordering::Relaxed)
    }

    /// Number of release calls observed
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaDevices for ScriptedMediaDevices {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<MediaHandle, MediaFailure> {
        let id = self.acquires.fetch_add(1, Ordering::Relaxed);
        match &self.outcome {
            Ok(()) => Ok(MediaHandle(id)),
            Err(failure) => Err(failure.clone()),
        }
    }

    async fn release(&self, _handle: MediaHandle) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_granting_counts_calls() {
        let devices = ScriptedMediaDevices::granting();
        let handle = devices.acquire(&MediaConstraints::default()).await.unwrap();
        devices.release(handle).await;
        assert_eq!(devices.acquire_count(), 1);
        assert_eq!(devices.release_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failing_returns_configured_failure() {
        let devices = ScriptedMediaDevices::failing(MediaFailure::Busy);
        let err = devices
            .acquire(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err, MediaFailure::Busy);
        assert_eq!(devices.release_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_constraints_are_unsatisfiable() {
        let devices = SystemMediaDevices::default();
        let err = devices
            .acquire(&MediaConstraints {
                audio: false,
                video: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MediaFailure::ConstraintsUnsatisfiable);
    }

    #[test]
    fn test_failure_error_mapping() {
        assert!(matches!(
            MediaFailure::PermissionDenied.into_error(),
            HearthError::PermissionDenied { .. }
        ));
        assert!(matches!(
            MediaFailure::NotFound.into_error(),
            HearthError::NotFound { .. }
        ));
        assert!(matches!(
            MediaFailure::Busy.into_error(),
            HearthError::Internal { .. }
        ));
    }
}
