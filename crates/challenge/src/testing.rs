//! Scriptable in-memory page for tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use veriflow_core::Cookie;

use crate::probe::{ElementHandle, Hop, LookupKey, PageProbe, ProbeError};

/// Fresh directory path under the system temp dir. Not created.
pub fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("veriflow-{}-{}-{}", name, std::process::id(), n))
}

#[derive(Debug)]
enum ClickBehavior {
    Works,
    Fails,
    ClosesPage,
}

#[derive(Debug)]
struct PageState {
    present: HashSet<String>,
    erroring: HashSet<String>,
    revealed_by_click: Vec<String>,
    turnstile: bool,
    broken_hop: Option<String>,
    click_behavior: ClickBehavior,
    failing_screenshots: bool,
    cookies: Vec<Cookie>,
    cookie_failures: u32,
    cookies_from_call: u32,

    hops: Vec<String>,
    clicks: Vec<ElementHandle>,
    inputs: Vec<(String, String)>,
    screenshots: Vec<PathBuf>,
    cookie_calls: u32,
}

pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState {
                present: HashSet::new(),
                erroring: HashSet::new(),
                revealed_by_click: Vec::new(),
                turnstile: false,
                broken_hop: None,
                click_behavior: ClickBehavior::Works,
                failing_screenshots: false,
                cookies: Vec::new(),
                cookie_failures: 0,
                cookies_from_call: 1,
                hops: Vec::new(),
                clicks: Vec::new(),
                inputs: Vec::new(),
                screenshots: Vec::new(),
                cookie_calls: 0,
            }),
        }
    }

    fn edit(self, f: impl FnOnce(&mut PageState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_keys(self, keys: &[&str]) -> Self {
        self.edit(|s| s.present.extend(keys.iter().map(|k| k.to_string())))
    }

    pub fn failing_key(self, key: &str) -> Self {
        self.edit(|s| {
            s.erroring.insert(key.to_string());
        })
    }

    pub fn with_turnstile(self) -> Self {
        self.edit(|s| s.turnstile = true)
    }

    /// Make the hop with this display name lead nowhere.
    pub fn break_hop(self, hop: &str) -> Self {
        self.edit(|s| s.broken_hop = Some(hop.to_string()))
    }

    pub fn clicking_reveals(self, keys: &[&str]) -> Self {
        self.edit(|s| s.revealed_by_click = keys.iter().map(|k| k.to_string()).collect())
    }

    pub fn failing_clicks(self) -> Self {
        self.edit(|s| s.click_behavior = ClickBehavior::Fails)
    }

    pub fn closing_on_click(self) -> Self {
        self.edit(|s| s.click_behavior = ClickBehavior::ClosesPage)
    }

    pub fn failing_screenshots(self) -> Self {
        self.edit(|s| s.failing_screenshots = true)
    }

    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        self.edit(|s| s.cookies = cookies)
    }

    /// The first `n` cookie reads fail.
    pub fn cookies_fail_times(self, n: u32) -> Self {
        self.edit(|s| s.cookie_failures = n)
    }

    /// Cookies are returned from the `n`th read on; earlier reads see an empty jar.
    pub fn cookies_appear_on_call(self, n: u32) -> Self {
        self.edit(|s| s.cookies_from_call = n)
    }

    pub fn hops(&self) -> Vec<String> {
        self.state.lock().unwrap().hops.clone()
    }

    pub fn clicks(&self) -> Vec<ElementHandle> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn inputs(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().inputs.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().screenshots.clone()
    }

    pub fn cookie_calls(&self) -> u32 {
        self.state.lock().unwrap().cookie_calls
    }
}

#[async_trait]
impl PageProbe for FakePage {
    async fn exists(&self, key: &LookupKey) -> Result<bool, ProbeError> {
        let state = self.state.lock().unwrap();
        if state.erroring.contains(key.as_str()) {
            return Err(ProbeError::Interaction(format!("lookup of {} timed out", key)));
        }
        Ok(state.present.contains(key.as_str()))
    }

    async fn locate(&self, key: &LookupKey) -> Result<Option<ElementHandle>, ProbeError> {
        let state = self.state.lock().unwrap();
        if key.as_str() == "@id=cf-turnstile" && state.turnstile {
            return Ok(Some(ElementHandle::new("turnstile-container")));
        }
        Ok(state
            .present
            .contains(key.as_str())
            .then(|| ElementHandle::new(key.as_str())))
    }

    async fn descend(&self, from: &ElementHandle, hop: &Hop) -> Result<Option<ElementHandle>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        let name = hop.to_string();
        state.hops.push(name.clone());
        if state.broken_hop.as_deref() == Some(name.as_str()) {
            return Ok(None);
        }
        if *hop == Hop::Find(LookupKey::from("tag:input")) {
            return Ok(Some(ElementHandle::new("turnstile-input")));
        }
        Ok(Some(ElementHandle::new(format!("{}/{}", from.as_str(), name))))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(element.clone());
        match state.click_behavior {
            ClickBehavior::Works => {
                let revealed = state.revealed_by_click.clone();
                state.present.extend(revealed);
                Ok(())
            }
            ClickBehavior::Fails => Err(ProbeError::Stale(element.as_str().to_string())),
            ClickBehavior::ClosesPage => Err(ProbeError::Closed("target crashed".into())),
        }
    }

    async fn input(&self, element: &ElementHandle, text: &str) -> Result<(), ProbeError> {
        self.state
            .lock()
            .unwrap()
            .inputs
            .push((element.as_str().to_string(), text.to_string()));
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.screenshots.push(path.to_path_buf());
        if state.failing_screenshots {
            return Err(ProbeError::Interaction("capture failed".into()));
        }
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.cookie_calls += 1;
        if state.cookie_calls <= state.cookie_failures {
            return Err(ProbeError::Interaction("cookie read failed".into()));
        }
        if state.cookie_calls < state.cookies_from_call {
            return Ok(Vec::new());
        }
        Ok(state.cookies.clone())
    }

    async fn run_script(&self, _code: &str) -> Result<serde_json::Value, ProbeError> {
        Ok(serde_json::Value::Null)
    }
}
