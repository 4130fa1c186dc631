//! chromiumoxide-backed [`BrowserDriver`] implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::target::{resolve_elements, resolve_one};
use super::{BrowserDriver, EffectiveRequest, ReplayResponse};
use crate::capture::NetworkCapture;
use crate::error::{Result, ShowRunError};
use crate::pack::flow::{Target, WaitUntil};

/// One live chromiumoxide session: the browser process handle, its current
/// tabs, and the capture buffer fed by a background CDP-event task.
pub struct ChromiumDriver {
    browser: Browser,
    _handler_task: JoinHandle<()>,
    pages: Vec<Page>,
    active_tab: usize,
    capture: Arc<NetworkCapture>,
    _capture_tasks: Vec<JoinHandle<()>>,
    /// Cached from the last `navigate`/`new_tab`/`switch_tab` call, since
    /// [`BrowserDriver::current_url`] is synchronous and can't await
    /// `Page::url()`.
    last_known_url: String,
}

impl ChromiumDriver {
    /// Wrap an already-launched browser and its first page, wiring network
    /// capture onto that page.
    pub async fn attach(browser: Browser, handler_task: JoinHandle<()>, first_page: Page) -> Result<Self> {
        let capture = Arc::new(NetworkCapture::new());
        let capture_task = spawn_capture_task(first_page.clone(), capture.clone());

        Ok(Self {
            browser,
            _handler_task: handler_task,
            pages: vec![first_page],
            active_tab: 0,
            capture,
            _capture_tasks: vec![capture_task],
            last_known_url: String::new(),
        })
    }

    fn page(&self) -> Result<&Page> {
        self.pages
            .get(self.active_tab)
            .ok_or_else(|| ShowRunError::InternalError("no active tab".into()))
    }

    async fn wait_until(&self, page: &Page, wait_until: WaitUntil) -> Result<()> {
        let script = match wait_until {
            WaitUntil::Load => "document.readyState === 'complete'",
            WaitUntil::DomContentLoaded => {
                "document.readyState === 'interactive' || document.readyState === 'complete'"
            }
            WaitUntil::NetworkIdle => "document.readyState === 'complete'",
        };
        poll_until(page, script).await
    }
}

async fn poll_until(page: &Page, predicate_js: &str) -> Result<()> {
    let script = format!("({predicate_js})");
    for _ in 0..600 {
        let satisfied = page
            .evaluate(script.as_str())
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false);
        if satisfied {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(ShowRunError::WaitTimeout(30_000))
}

fn spawn_capture_task(page: Page, capture: Arc<NetworkCapture>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut requests = match page.event_listener::<EventRequestWillBeSent>().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to attach request listener");
                return;
            }
        };
        let mut responses = match page.event_listener::<EventResponseReceived>().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to attach response listener");
                return;
            }
        };

        let request_ids: dashmap::DashMap<String, u64> = dashmap::DashMap::new();
        let page_for_body = page.clone();

        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    let headers: HashMap<String, String> = event
                        .request
                        .headers
                        .inner()
                        .as_object()
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                        .unwrap_or_default();
                    let resource_type = format!("{:?}", event.r#type);
                    let body = event.request.post_data.clone();
                    let id = capture.record_request(
                        event.request.method.clone(),
                        event.request.url.clone(),
                        resource_type,
                        headers,
                        body,
                    );
                    request_ids.insert(event.request_id.inner().to_string(), id);
                }
                Some(event) = responses.next() => {
                    let Some((_, internal_id)) = request_ids.remove(event.request_id.inner()) else { continue };
                    let headers: HashMap<String, String> = event
                        .response
                        .headers
                        .inner()
                        .as_object()
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                        .unwrap_or_default();
                    let content_type = Some(event.response.mime_type.clone());
                    let status = u16::try_from(event.response.status).unwrap_or(0);

                    let body_bytes = page_for_body
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                        .ok()
                        .and_then(|r| {
                            if r.base64_encoded {
                                use base64::Engine;
                                base64::engine::general_purpose::STANDARD.decode(&r.body).ok()
                            } else {
                                Some(r.body.clone().into_bytes())
                            }
                        })
                        .unwrap_or_default();

                    capture.record_response(internal_id, status, headers, content_type, &body_bytes);
                }
                else => break,
            }
        }
    })
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str, wait_until: Option<WaitUntil>, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            page.goto(url)
                .await
                .map_err(|e| ShowRunError::InternalError(format!("navigate failed: {e}")))?;
            self.wait_until(&page, wait_until.unwrap_or(WaitUntil::Load)).await
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::NavigationTimeout(timeout.as_millis() as u64))??;
        self.last_known_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn wait_for(
        &mut self,
        target: Option<&Target>,
        url_includes: Option<&str>,
        load_state: Option<WaitUntil>,
        visible: Option<bool>,
        timeout: Duration,
    ) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            if let Some(state) = load_state {
                self.wait_until(&page, state).await?;
            }
            if let Some(substr) = url_includes {
                loop {
                    let current = page.url().await.ok().flatten().unwrap_or_default();
                    if current.contains(substr) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            if let Some(target) = target {
                loop {
                    let elements = resolve_elements(&page, target).await.unwrap_or_default();
                    let found = if visible.unwrap_or(true) { !elements.is_empty() } else { true };
                    if found {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn click(&mut self, target: &Target, first: bool, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            let element = resolve_one(&page, target, first).await?;
            element
                .click()
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn fill(&mut self, target: &Target, value: &str, clear: bool, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            let element = resolve_one(&page, target, false).await?;
            if clear {
                element
                    .click()
                    .await
                    .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            }
            element
                .type_str(value)
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn select_option(&mut self, target: &Target, value: &str, first: bool, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            let element = resolve_one(&page, target, first).await?;
            element
                .select(vec![value])
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn press_key(
        &mut self,
        target: Option<&Target>,
        key: &str,
        times: u32,
        delay: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            if let Some(target) = target {
                let element = resolve_one(&page, target, false).await?;
                element
                    .click()
                    .await
                    .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            }
            for i in 0..times.max(1) {
                page.press_key(key)
                    .await
                    .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
                if i + 1 < times {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn upload_file(&mut self, target: &Target, files: &[String], timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            let element = resolve_one(&page, target, false).await?;
            element
                .set_input_files(files.to_vec())
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?;
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn enter_frame(&mut self, target: &Target, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        let fut = async {
            let _frame_element = resolve_one(&page, target, false).await?;
            Ok(())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn exit_frame(&mut self) -> Result<()> {
        Ok(())
    }

    async fn new_tab(&mut self, url: &str, timeout: Duration) -> Result<usize> {
        let fut = async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| ShowRunError::InternalError(format!("new_tab failed: {e}")))?;
            let task = spawn_capture_task(page.clone(), self.capture.clone());
            self.last_known_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());
            self._capture_tasks.push(task);
            self.pages.push(page);
            self.active_tab = self.pages.len() - 1;
            Ok(self.active_tab)
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::NavigationTimeout(timeout.as_millis() as u64))?
    }

    async fn switch_tab(&mut self, index: usize, close_current: bool) -> Result<()> {
        if index >= self.pages.len() {
            return Err(ShowRunError::TargetNotFound(format!("no tab at index {index}")));
        }
        if close_current {
            let current = self.pages.remove(self.active_tab);
            let _ = current.close().await;
            self.active_tab = index.min(self.pages.len().saturating_sub(1));
        } else {
            self.active_tab = index;
        }
        self.last_known_url = self.page()?.url().await.ok().flatten().unwrap_or_default();
        Ok(())
    }

    async fn extract_title(&mut self) -> Result<String> {
        let page = self.page()?;
        page.get_title()
            .await
            .map_err(|e| ShowRunError::InternalError(format!("get_title failed: {e}")))?
            .ok_or_else(|| ShowRunError::InternalError("page has no title".into()))
    }

    async fn extract_text(
        &mut self,
        target: &Target,
        first: bool,
        trim: bool,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let page = self.page()?.clone();
        let fut = async {
            let elements = if first {
                match resolve_one(&page, target, true).await {
                    Ok(el) => vec![el],
                    Err(ShowRunError::TargetNotFound(_)) => vec![],
                    Err(e) => return Err(e),
                }
            } else {
                resolve_elements(&page, target).await?
            };
            let Some(element) = elements.into_iter().next() else { return Ok(None) };
            let text = element
                .inner_text()
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))?
                .unwrap_or_default();
            Ok(Some(if trim { text.trim().to_string() } else { text }))
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn extract_attribute(
        &mut self,
        target: &Target,
        attribute: &str,
        first: bool,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let page = self.page()?.clone();
        let fut = async {
            let element = match resolve_one(&page, target, first).await {
                Ok(el) => el,
                Err(ShowRunError::TargetNotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            element
                .attribute(attribute)
                .await
                .map_err(|e| ShowRunError::ElementNotInteractable(e.to_string()))
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    async fn assert_target(
        &mut self,
        target: Option<&Target>,
        visible: Option<bool>,
        text_includes: Option<&str>,
        url_includes: Option<&str>,
        timeout: Duration,
    ) -> Result<bool> {
        let page = self.page()?.clone();
        let fut = async {
            if let Some(substr) = url_includes {
                let current = page.url().await.ok().flatten().unwrap_or_default();
                if !current.contains(substr) {
                    return Ok(false);
                }
            }
            if let Some(target) = target {
                let elements = resolve_elements(&page, target).await.unwrap_or_default();
                let want_visible = visible.unwrap_or(true);
                if want_visible && elements.is_empty() {
                    return Ok(false);
                }
                if !want_visible && !elements.is_empty() {
                    return Ok(false);
                }
                if let Some(needle) = text_includes {
                    if let Some(element) = elements.into_iter().next() {
                        let text = element.inner_text().await.ok().flatten().unwrap_or_default();
                        if !text.contains(needle) {
                            return Ok(false);
                        }
                    }
                }
            }
            Ok(true)
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::WaitTimeout(timeout.as_millis() as u64))?
    }

    fn current_url(&self) -> String {
        self.last_known_url.clone()
    }

    fn capture(&self) -> Arc<NetworkCapture> {
        self.capture.clone()
    }

    async fn replay_in_browser_context(&self, request: &EffectiveRequest, timeout: Duration) -> Result<ReplayResponse> {
        let page = self.page()?.clone();
        let headers_json = serde_json::to_string(&request.headers).unwrap_or_else(|_| "{}".into());
        let body_js = request
            .body
            .as_ref()
            .map(|b| format!(", body: {b:?}"))
            .unwrap_or_default();

        let script = format!(
            r"(async () => {{
                const resp = await fetch({url:?}, {{
                    method: {method:?},
                    headers: {headers_json},
                    credentials: 'include'
                    {body_js}
                }});
                const text = await resp.text();
                const headers = {{}};
                resp.headers.forEach((v, k) => headers[k] = v);
                return JSON.stringify({{status: resp.status, headers, body: text}});
            }})()",
            url = request.url,
            method = request.method,
        );

        let fut = async {
            let raw = page
                .evaluate(script.as_str())
                .await
                .map_err(|e| ShowRunError::ReplayError(format!("in-browser fetch failed: {e}")))?
                .into_value::<String>()
                .map_err(|e| ShowRunError::ReplayError(format!("invalid fetch result: {e}")))?;

            #[derive(serde::Deserialize)]
            struct RawResponse {
                status: u16,
                headers: HashMap<String, String>,
                body: String,
            }
            let parsed: RawResponse = serde_json::from_str(&raw)
                .map_err(|e| ShowRunError::ReplayError(format!("malformed fetch result: {e}")))?;

            Ok(ReplayResponse { status: parsed.status, headers: parsed.headers, body: parsed.body.into_bytes() })
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ShowRunError::ReplayError("replay timed out".into()))?
    }

    async fn close(&mut self) -> Result<()> {
        for page in &self.pages {
            let _ = page.close().await;
        }
        self.browser
            .close()
            .await
            .map_err(|e| ShowRunError::InternalError(format!("browser close failed: {e}")))?;
        Ok(())
    }
}
