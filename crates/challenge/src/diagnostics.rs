//! Screenshot capture at challenge phase boundaries.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use veriflow_core::config::DiagnosticsConfig;

use crate::probe::PageProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Start,
    Clicked,
    Success,
    Failed,
    Error,
}

impl SnapshotPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotPhase::Start => "start",
            SnapshotPhase::Clicked => "clicked",
            SnapshotPhase::Success => "success",
            SnapshotPhase::Failed => "failed",
            SnapshotPhase::Error => "error",
        }
    }
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes `challenge_<phase>[_<unix-seconds>].png` into a directory.
/// Failures are logged and never propagate.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    enabled: bool,
    dir: PathBuf,
    timestamped: bool,
}

impl SnapshotRecorder {
    pub fn new(dir: impl Into<PathBuf>, timestamped: bool) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
            timestamped,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::new(),
            timestamped: false,
        }
    }

    pub fn from_config(config: &DiagnosticsConfig) -> Self {
        if config.enabled {
            Self::new(&config.screenshot_dir, config.timestamped)
        } else {
            Self::disabled()
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, phase: SnapshotPhase) -> String {
        if self.timestamped {
            format!("challenge_{}_{}.png", phase, chrono::Utc::now().timestamp())
        } else {
            format!("challenge_{}.png", phase)
        }
    }

    pub async fn capture(&self, probe: &dyn PageProbe, phase: SnapshotPhase) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "cannot create screenshot directory");
            return None;
        }

        let path = self.dir.join(self.file_name(phase));
        match probe.screenshot(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "📸 snapshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(phase = %phase, error = %e, "snapshot failed");
                None
            }
        }
    }
}
