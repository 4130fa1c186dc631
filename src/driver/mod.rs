//! Browser Driver Adapter
//!
//! The interpreter drives the browser only through [`BrowserDriver`]; target
//! resolution, stability waits, and network capture wiring live behind this
//! trait. `chromium` is the chromiumoxide-backed implementation used in
//! production; tests substitute an in-memory fake.

pub mod chromium;
pub mod persistence;
pub mod target;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capture::NetworkCapture;
use crate::error::Result;
use crate::pack::flow::{Target, WaitUntil};

pub use chromium::ChromiumDriver;
pub use persistence::ActiveProfile;

/// A network request replayed through the driver's HTTP context, after
/// template resolution and override application.
#[derive(Debug, Clone)]
pub struct EffectiveRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReplayResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Abstract capability the interpreter drives flows through. One instance
/// owns exactly one browser session for the duration of a `run()` call.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&mut self, url: &str, wait_until: Option<WaitUntil>, timeout: Duration) -> Result<()>;

    async fn wait_for(
        &mut self,
        target: Option<&Target>,
        url_includes: Option<&str>,
        load_state: Option<WaitUntil>,
        visible: Option<bool>,
        timeout: Duration,
    ) -> Result<()>;

    async fn click(&mut self, target: &Target, first: bool, timeout: Duration) -> Result<()>;

    async fn fill(&mut self, target: &Target, value: &str, clear: bool, timeout: Duration) -> Result<()>;

    async fn select_option(&mut self, target: &Target, value: &str, first: bool, timeout: Duration) -> Result<()>;

    async fn press_key(
        &mut self,
        target: Option<&Target>,
        key: &str,
        times: u32,
        delay: Duration,
        timeout: Duration,
    ) -> Result<()>;

    async fn upload_file(&mut self, target: &Target, files: &[String], timeout: Duration) -> Result<()>;

    async fn enter_frame(&mut self, target: &Target, timeout: Duration) -> Result<()>;

    async fn exit_frame(&mut self) -> Result<()>;

    /// Open `url` in a new tab; returns the new tab's index.
    async fn new_tab(&mut self, url: &str, timeout: Duration) -> Result<usize>;

    async fn switch_tab(&mut self, index: usize, close_current: bool) -> Result<()>;

    async fn extract_title(&mut self) -> Result<String>;

    async fn extract_text(
        &mut self,
        target: &Target,
        first: bool,
        trim: bool,
        timeout: Duration,
    ) -> Result<Option<String>>;

    async fn extract_attribute(
        &mut self,
        target: &Target,
        attribute: &str,
        first: bool,
        timeout: Duration,
    ) -> Result<Option<String>>;

    /// Evaluate an `assert` step's conditions against current page state.
    async fn assert_target(
        &mut self,
        target: Option<&Target>,
        visible: Option<bool>,
        text_includes: Option<&str>,
        url_includes: Option<&str>,
        timeout: Duration,
    ) -> Result<bool>;

    fn current_url(&self) -> String;

    /// The page's network capture buffer, shared with the interpreter's
    /// `network_find`/`network_replay` handlers.
    fn capture(&self) -> Arc<NetworkCapture>;

    /// Issue `request` through the browser's authenticated HTTP context
    /// (cookies/session shared with DOM navigation), for
    /// `network_replay.auth = browser_context`.
    async fn replay_in_browser_context(&self, request: &EffectiveRequest, timeout: Duration) -> Result<ReplayResponse>;

    async fn close(&mut self) -> Result<()>;
}
