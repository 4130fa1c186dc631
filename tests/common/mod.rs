//! Shared fixtures for the flow-runtime integration tests: an in-memory
//! [`BrowserDriver`] fake plus pack-directory builders, mirroring the
//! `NoDriver` fake already used by `src/auth/mod.rs`'s own unit tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use showrun_core::capture::NetworkCapture;
use showrun_core::driver::{BrowserDriver, EffectiveRequest, ReplayResponse};
use showrun_core::error::Result;
use showrun_core::pack::flow::{Target, WaitUntil};

/// Scripted in-memory driver. Every interaction method succeeds by default;
/// tests configure `title`/`extracted_text`/`extracted_attribute`/
/// `replay_queue`/`guard_visible` up front and read back
/// `navigate_calls`/`navigated_urls` afterward.
pub struct FakeDriver {
    pub capture: Arc<NetworkCapture>,
    current_url: Mutex<String>,
    pub title: Mutex<String>,
    pub extracted_text: Mutex<Option<String>>,
    pub extracted_attribute: Mutex<Option<String>>,
    pub guard_visible: AtomicBool,
    pub replay_queue: Mutex<std::collections::VecDeque<ReplayResponse>>,
    pub navigate_calls: AtomicUsize,
    pub navigated_urls: Mutex<Vec<String>>,
    pub fail_click_once: AtomicBool,
    pub fail_click_always: AtomicBool,
    pub click_calls: AtomicUsize,
    pub replayed_requests: Mutex<Vec<EffectiveRequest>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            capture: Arc::new(NetworkCapture::new()),
            current_url: Mutex::new(String::new()),
            title: Mutex::new(String::new()),
            extracted_text: Mutex::new(None),
            extracted_attribute: Mutex::new(None),
            guard_visible: AtomicBool::new(false),
            replay_queue: Mutex::new(std::collections::VecDeque::new()),
            navigate_calls: AtomicUsize::new(0),
            navigated_urls: Mutex::new(Vec::new()),
            fail_click_once: AtomicBool::new(false),
            fail_click_always: AtomicBool::new(false),
            click_calls: AtomicUsize::new(0),
            replayed_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDriver {
    pub fn with_title(title: impl Into<String>) -> Self {
        let driver = Self::default();
        *driver.title.lock() = title.into();
        driver
    }

    pub fn queue_replay(&self, response: ReplayResponse) {
        self.replay_queue.lock().push_back(response);
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&mut self, url: &str, _wait_until: Option<WaitUntil>, _timeout: Duration) -> Result<()> {
        self.navigate_calls.fetch_add(1, Ordering::SeqCst);
        self.navigated_urls.lock().push(url.to_string());
        *self.current_url.lock() = url.to_string();
        Ok(())
    }

    async fn wait_for(
        &mut self,
        _target: Option<&Target>,
        _url_includes: Option<&str>,
        _load_state: Option<WaitUntil>,
        _visible: Option<bool>,
        _timeout: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn click(&mut self, _target: &Target, _first: bool, _timeout: Duration) -> Result<()> {
        self.click_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_click_once.swap(false, Ordering::SeqCst) || self.fail_click_always.load(Ordering::SeqCst) {
            return Err(showrun_core::error::ShowRunError::AuthFailure);
        }
        Ok(())
    }

    async fn fill(&mut self, _target: &Target, _value: &str, _clear: bool, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn select_option(&mut self, _target: &Target, _value: &str, _first: bool, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn press_key(
        &mut self,
        _target: Option<&Target>,
        _key: &str,
        _times: u32,
        _delay: Duration,
        _timeout: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn upload_file(&mut self, _target: &Target, _files: &[String], _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn enter_frame(&mut self, _target: &Target, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn exit_frame(&mut self) -> Result<()> {
        Ok(())
    }

    async fn new_tab(&mut self, url: &str, timeout: Duration) -> Result<usize> {
        self.navigate(url, None, timeout).await?;
        Ok(0)
    }

    async fn switch_tab(&mut self, _index: usize, _close_current: bool) -> Result<()> {
        Ok(())
    }

    async fn extract_title(&mut self) -> Result<String> {
        Ok(self.title.lock().clone())
    }

    async fn extract_text(&mut self, _target: &Target, _first: bool, _trim: bool, _timeout: Duration) -> Result<Option<String>> {
        Ok(self.extracted_text.lock().clone())
    }

    async fn extract_attribute(&mut self, _target: &Target, _attribute: &str, _first: bool, _timeout: Duration) -> Result<Option<String>> {
        Ok(self.extracted_attribute.lock().clone())
    }

    async fn assert_target(
        &mut self,
        _target: Option<&Target>,
        _visible: Option<bool>,
        _text_includes: Option<&str>,
        _url_includes: Option<&str>,
        _timeout: Duration,
    ) -> Result<bool> {
        Ok(self.guard_visible.load(Ordering::SeqCst))
    }

    fn current_url(&self) -> String {
        self.current_url.lock().clone()
    }

    fn capture(&self) -> Arc<NetworkCapture> {
        self.capture.clone()
    }

    async fn replay_in_browser_context(&self, request: &EffectiveRequest, _timeout: Duration) -> Result<ReplayResponse> {
        self.replayed_requests.lock().push(request.clone());
        let mut queue = self.replay_queue.lock();
        Ok(queue.pop_front().unwrap_or(ReplayResponse { status: 200, headers: HashMap::new(), body: Vec::new() }))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes a minimal `taskpack.json` + `flow.json` into `dir`, following the
/// layout `Pack::load` expects.
pub fn write_pack(dir: &Path, manifest_json: &serde_json::Value, flow_json: &serde_json::Value) {
    std::fs::write(dir.join("taskpack.json"), serde_json::to_string_pretty(manifest_json).unwrap()).unwrap();
    std::fs::write(dir.join("flow.json"), serde_json::to_string_pretty(flow_json).unwrap()).unwrap();
}
