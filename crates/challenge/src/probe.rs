use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use veriflow_core::{Cookie, VerifyError};

/// Errors reported by a page automation driver.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// A single lookup or interaction failed; the page is still usable.
    #[error("page interaction failed: {0}")]
    Interaction(String),

    /// The element went away between lookup and use.
    #[error("element is no longer attached: {0}")]
    Stale(String),

    /// The page or browser is gone. Nothing further can succeed.
    #[error("page closed: {0}")]
    Closed(String),
}

impl ProbeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::Closed(_))
    }
}

/// A closed page maps to a non-transient error so retry loops stop on it.
impl From<ProbeError> for VerifyError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Closed(reason) => VerifyError::PageClosed(reason),
            other => VerifyError::Transport(other.to_string()),
        }
    }
}

/// Selector understood by the page driver, e.g. `@id=cf-turnstile`,
/// `tag:iframe` or plain text to match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey(String);

impl LookupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LookupKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Driver-issued reference to a located element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One step of a nested element lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    FirstChild,
    ShadowRoot,
    /// Switch into the document of an `<iframe>` element.
    Frame,
    /// First descendant matching the key.
    Find(LookupKey),
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::FirstChild => f.write_str("child"),
            Hop::ShadowRoot => f.write_str("shadow-root"),
            Hop::Frame => f.write_str("frame"),
            Hop::Find(key) => write!(f, "find({})", key),
        }
    }
}

/// Page automation seen through the handful of calls the challenge flow needs.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn exists(&self, key: &LookupKey) -> Result<bool, ProbeError>;

    async fn locate(&self, key: &LookupKey) -> Result<Option<ElementHandle>, ProbeError>;

    /// Follow one hop from `from`. `Ok(None)` when there is nothing there.
    async fn descend(&self, from: &ElementHandle, hop: &Hop) -> Result<Option<ElementHandle>, ProbeError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), ProbeError>;

    async fn input(&self, element: &ElementHandle, text: &str) -> Result<(), ProbeError>;

    /// Write a PNG of the current viewport to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), ProbeError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, ProbeError>;

    async fn run_script(&self, code: &str) -> Result<serde_json::Value, ProbeError>;
}

/// Finds the clickable input of a challenge widget.
#[async_trait]
pub trait ChallengeLocator: Send + Sync {
    async fn locate_challenge_input(
        &self,
        probe: &dyn PageProbe,
    ) -> Result<Option<ElementHandle>, ProbeError>;
}

/// Walks a container through a fixed chain of hops.
///
/// The default chain reaches the checkbox of a Turnstile widget: container
/// `@id=cf-turnstile`, its first child, that child's shadow root, the
/// `<iframe>` inside, the frame's `<body>`, its shadow root, and the `<input>`.
#[derive(Debug, Clone)]
pub struct NestedWidgetLocator {
    container: LookupKey,
    path: Vec<Hop>,
}

impl NestedWidgetLocator {
    pub fn new(container: LookupKey, path: Vec<Hop>) -> Self {
        Self { container, path }
    }

    pub fn container(&self) -> &LookupKey {
        &self.container
    }

    pub fn path(&self) -> &[Hop] {
        &self.path
    }
}

impl Default for NestedWidgetLocator {
    fn default() -> Self {
        Self::new(
            LookupKey::from("@id=cf-turnstile"),
            vec![
                Hop::FirstChild,
                Hop::ShadowRoot,
                Hop::Find(LookupKey::from("tag:iframe")),
                Hop::Frame,
                Hop::Find(LookupKey::from("tag:body")),
                Hop::ShadowRoot,
                Hop::Find(LookupKey::from("tag:input")),
            ],
        )
    }
}

#[async_trait]
impl ChallengeLocator for NestedWidgetLocator {
    async fn locate_challenge_input(
        &self,
        probe: &dyn PageProbe,
    ) -> Result<Option<ElementHandle>, ProbeError> {
        let Some(mut current) = probe.locate(&self.container).await? else {
            debug!(container = %self.container, "challenge container not present");
            return Ok(None);
        };

        for hop in &self.path {
            match probe.descend(&current, hop).await? {
                Some(next) => current = next,
                None => {
                    debug!(hop = %hop, "challenge widget chain broken");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }
}
