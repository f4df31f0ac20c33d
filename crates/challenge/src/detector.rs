use tracing::{debug, info};

use veriflow_core::ChallengeState;

use crate::probe::{LookupKey, PageProbe};

/// Classifies the current page by probing one marker per state.
#[derive(Debug, Clone)]
pub struct ChallengeStateDetector {
    markers: Vec<(ChallengeState, LookupKey)>,
}

impl Default for ChallengeStateDetector {
    fn default() -> Self {
        Self::new(vec![
            (ChallengeState::PasswordEntry, LookupKey::from("@name=password")),
            (ChallengeState::ChallengePending, LookupKey::from("@data-index=0")),
            (ChallengeState::SettingsReached, LookupKey::from("Account Settings")),
        ])
    }
}

impl ChallengeStateDetector {
    /// Markers are checked in the given order; the first present one wins.
    pub fn new(markers: Vec<(ChallengeState, LookupKey)>) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &[(ChallengeState, LookupKey)] {
        &self.markers
    }

    pub async fn detect(&self, probe: &dyn PageProbe) -> Option<ChallengeState> {
        for (state, key) in &self.markers {
            match probe.exists(key).await {
                Ok(true) => {
                    info!(state = ?state, marker = %key, "page state detected");
                    return Some(*state);
                }
                Ok(false) => {}
                Err(e) => debug!(marker = %key, error = %e, "marker probe failed, treating as absent"),
            }
        }
        None
    }

    /// Like [`detect`](Self::detect), with `Indeterminate` for no match.
    pub async fn classify(&self, probe: &dyn PageProbe) -> ChallengeState {
        self.detect(probe).await.unwrap_or(ChallengeState::Indeterminate)
    }
}
