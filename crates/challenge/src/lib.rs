pub mod detector;
pub mod diagnostics;
pub mod entry;
pub mod probe;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::ChallengeStateDetector;
pub use diagnostics::{SnapshotPhase, SnapshotRecorder};
pub use entry::CodeEntry;
pub use probe::{ChallengeLocator, ElementHandle, Hop, LookupKey, NestedWidgetLocator, PageProbe, ProbeError};
pub use resolver::{ChallengeResolver, PhaseTransition, Resolution, ResolverPhase};
pub use session::{token_from_cookies, SessionTokenExtractor};
