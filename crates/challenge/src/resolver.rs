use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use veriflow_core::config::AppConfig;
use veriflow_core::{ChallengeState, Delay, RetryOutcome, RetryPolicy, VerifyError};

use crate::detector::ChallengeStateDetector;
use crate::diagnostics::{SnapshotPhase, SnapshotRecorder};
use crate::probe::{ChallengeLocator, ElementHandle, NestedWidgetLocator, PageProbe, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    Start,
    Probing,
    Resolving,
    Resolved,
    Failed,
}

impl fmt::Display for ResolverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolverPhase::Start => "start",
            ResolverPhase::Probing => "probing",
            ResolverPhase::Resolving => "resolving",
            ResolverPhase::Resolved => "resolved",
            ResolverPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: ResolverPhase,
    pub to: ResolverPhase,
    pub at: DateTime<Utc>,
    pub details: Option<String>,
}

/// Outcome of a successful [`ChallengeResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub state: ChallengeState,
    pub rounds: u32,
    pub transitions: Vec<PhaseTransition>,
}

#[derive(Debug)]
struct PhaseLog {
    phase: ResolverPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseLog {
    fn new() -> Self {
        Self {
            phase: ResolverPhase::Start,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, to: ResolverPhase, details: Option<String>) {
        let from = std::mem::replace(&mut self.phase, to);
        debug!(from = %from, to = %to, "challenge phase");
        self.transitions.push(PhaseTransition {
            from,
            to,
            at: Utc::now(),
            details,
        });
    }
}

/// Locates and clicks a challenge widget until the page shows a known state.
pub struct ChallengeResolver<L = NestedWidgetLocator> {
    locator: L,
    detector: ChallengeStateDetector,
    snapshots: SnapshotRecorder,
    policy: RetryPolicy,
    click_delay: Delay,
    settle_delay: Delay,
}

impl ChallengeResolver<NestedWidgetLocator> {
    pub fn from_config(config: &AppConfig) -> Result<Self, VerifyError> {
        Ok(Self::new(
            NestedWidgetLocator::default(),
            ChallengeStateDetector::default(),
            SnapshotRecorder::from_config(&config.diagnostics),
            config.challenge.round_policy()?,
        )
        .with_delays(config.challenge.click_delay()?, config.challenge.settle_delay()?))
    }
}

impl<L: ChallengeLocator> ChallengeResolver<L> {
    pub fn new(
        locator: L,
        detector: ChallengeStateDetector,
        snapshots: SnapshotRecorder,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            locator,
            detector,
            snapshots,
            policy: policy.fail_fast(true),
            click_delay: Delay::Jittered {
                min: Duration::from_secs(1),
                max: Duration::from_secs(3),
            },
            settle_delay: Delay::fixed_secs(2),
        }
    }

    /// Pause before the click and settle time after it.
    pub fn with_delays(mut self, click_delay: Delay, settle_delay: Delay) -> Self {
        self.click_delay = click_delay;
        self.settle_delay = settle_delay;
        self
    }

    pub async fn resolve(&self, probe: &dyn PageProbe) -> Result<Resolution, VerifyError> {
        info!("🛡 checking for challenge");
        self.snapshots.capture(probe, SnapshotPhase::Start).await;

        let log = Mutex::new(PhaseLog::new());
        advance(&log, ResolverPhase::Probing, None);

        let outcome = self
            .policy
            .execute(|round| self.round(probe, round, &log))
            .await;

        match outcome {
            RetryOutcome::Success((state, round)) => {
                advance(&log, ResolverPhase::Resolved, Some(format!("{:?}", state)));
                info!(state = ?state, round, "✅ challenge cleared");
                self.snapshots.capture(probe, SnapshotPhase::Success).await;
                Ok(Resolution {
                    state,
                    rounds: round,
                    transitions: into_transitions(log),
                })
            }
            RetryOutcome::Exhausted { attempts, .. } => {
                advance(&log, ResolverPhase::Failed, Some("rounds exhausted".into()));
                error!(rounds = attempts, "challenge still pending after all rounds");
                self.snapshots.capture(probe, SnapshotPhase::Failed).await;
                Err(VerifyError::ChallengeUnresolved { rounds: attempts })
            }
            RetryOutcome::Fatal(e) => {
                advance(&log, ResolverPhase::Failed, Some(e.to_string()));
                error!(error = %e, "challenge handling aborted");
                self.snapshots.capture(probe, SnapshotPhase::Error).await;
                Err(e)
            }
        }
    }

    /// One round: try the widget, then classify the page either way.
    async fn round(
        &self,
        probe: &dyn PageProbe,
        round: u32,
        log: &Mutex<PhaseLog>,
    ) -> Result<Option<(ChallengeState, u32)>, VerifyError> {
        debug!(round, "challenge round");
        if current_phase(log) == ResolverPhase::Resolving {
            advance(log, ResolverPhase::Probing, Some(format!("round {}", round)));
        }

        match self.locator.locate_challenge_input(probe).await {
            Ok(Some(input)) => {
                info!(round, "challenge widget found, clicking");
                advance(log, ResolverPhase::Resolving, Some(format!("round {}", round)));

                match self.click(probe, &input).await {
                    Ok(()) => {
                        self.snapshots.capture(probe, SnapshotPhase::Clicked).await;
                        if let Some(state) = self.detector.detect(probe).await {
                            return Ok(Some((state, round)));
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => debug!(round, error = %e, "click attempt did not go through"),
                }
            }
            Ok(None) => debug!(round, "no challenge widget on page"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => debug!(round, error = %e, "challenge widget lookup failed"),
        }

        match self.detector.detect(probe).await {
            Some(state) => Ok(Some((state, round))),
            None => {
                warn!(round, "page state unknown after round");
                Ok(None)
            }
        }
    }

    async fn click(&self, probe: &dyn PageProbe, input: &ElementHandle) -> Result<(), ProbeError> {
        self.click_delay.wait().await;
        probe.click(input).await?;
        self.settle_delay.wait().await;
        Ok(())
    }
}

fn advance(log: &Mutex<PhaseLog>, to: ResolverPhase, details: Option<String>) {
    if let Ok(mut log) = log.lock() {
        log.advance(to, details);
    }
}

fn current_phase(log: &Mutex<PhaseLog>) -> ResolverPhase {
    log.lock().map(|log| log.phase).unwrap_or(ResolverPhase::Failed)
}

fn into_transitions(log: Mutex<PhaseLog>) -> Vec<PhaseTransition> {
    log.into_inner()
        .map(|log| log.transitions)
        .unwrap_or_default()
}
