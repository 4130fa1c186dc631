//! Per-session network capture buffer

mod redaction;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShowRunError};
use crate::pack::flow::{NetworkWhere, Pick};
use crate::utils::constants::{CAPTURE_MAX_BODY_BYTES, CAPTURE_MAX_BYTES, CAPTURE_MAX_ENTRIES, CAPTURE_SNIPPET_BYTES};

pub use redaction::redact_headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFilter {
    All,
    Api,
    Xhr,
}

impl CaptureFilter {
    fn matches(&self, entry: &CapturedEntry) -> bool {
        match self {
            Self::All => true,
            Self::Api => {
                entry.resource_type.eq_ignore_ascii_case("fetch")
                    || entry.resource_type.eq_ignore_ascii_case("xhr")
                    || entry.url.contains("/api/")
                    || entry.url.contains("graphql")
            }
            Self::Xhr => entry.resource_type.eq_ignore_ascii_case("xhr"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BodyStorage {
    Text(String),
    Base64(String),
    Discarded,
}

/// One captured request/response pair. Bodies over
/// [`CAPTURE_MAX_BODY_BYTES`] are discarded, keeping only metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEntry {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub resource_type: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub status: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub body: BodyStorage,
    pub arrival_seq: u64,
}

impl CapturedEntry {
    fn estimated_bytes(&self) -> usize {
        let body_len = match &self.body {
            BodyStorage::Text(t) => t.len(),
            BodyStorage::Base64(b) => b.len(),
            BodyStorage::Discarded => 0,
        };
        self.url.len() + self.request_body.as_ref().map_or(0, String::len) + body_len
    }

    fn decoded_text(&self) -> Option<String> {
        match &self.body {
            BodyStorage::Text(t) => Some(t.clone()),
            BodyStorage::Base64(b) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(b)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            }
            BodyStorage::Discarded => None,
        }
    }

    fn snippet(&self) -> Option<String> {
        self.decoded_text()
            .map(|text| crate::utils::safe_truncate_chars(&text, CAPTURE_SNIPPET_BYTES).to_string())
    }
}

/// Redacted view returned by `list`/`get`; never carries raw header values
/// for sensitive names or more than [`CAPTURE_SNIPPET_BYTES`] of body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub resource_type: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub snippet: Option<String>,
}

impl From<&CapturedEntry> for CaptureSummary {
    fn from(entry: &CapturedEntry) -> Self {
        Self {
            id: entry.id,
            method: entry.method.clone(),
            url: entry.url.clone(),
            resource_type: entry.resource_type.clone(),
            status: entry.status,
            content_type: entry.content_type.clone(),
            snippet: entry.snippet(),
        }
    }
}

/// Opaque serialized form used by the snapshot facility's export/import path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEntry(CapturedEntry);

struct State {
    entries: DashMap<u64, CapturedEntry>,
    order: Mutex<Vec<u64>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    bytes_estimate: Mutex<usize>,
}

/// Rolling, capped buffer of captured network traffic for one browser
/// session. Capped at [`CAPTURE_MAX_ENTRIES`] entries and
/// [`CAPTURE_MAX_BYTES`] aggregate estimate; oldest entries are evicted on
/// overflow.
pub struct NetworkCapture {
    state: State,
}

impl Default for NetworkCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkCapture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State {
                entries: DashMap::new(),
                order: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                bytes_estimate: Mutex::new(0),
            },
        }
    }

    /// Record a request, returning its internal id. Request body is
    /// truncated to 64 KiB before storage.
    pub fn record_request(
        &self,
        method: impl Into<String>,
        url: impl Into<String>,
        resource_type: impl Into<String>,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> u64 {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let seq = self.state.next_seq.fetch_add(1, Ordering::SeqCst);
        let truncated_body = body.map(|b| {
            crate::utils::safe_truncate_chars(&b, crate::utils::constants::CAPTURE_HEADER_TRUNCATE_BYTES).to_string()
        });

        let entry = CapturedEntry {
            id,
            method: method.into(),
            url: url.into(),
            resource_type: resource_type.into(),
            request_headers: headers,
            request_body: truncated_body,
            status: None,
            response_headers: HashMap::new(),
            content_type: None,
            body: BodyStorage::Discarded,
            arrival_seq: seq,
        };
        self.insert(entry);
        id
    }

    /// Attach response metadata/body to a previously recorded request.
    pub fn record_response(
        &self,
        id: u64,
        status: u16,
        headers: HashMap<String, String>,
        content_type: Option<String>,
        body_bytes: &[u8],
    ) {
        let Some(mut entry) = self.state.entries.get_mut(&id) else { return };

        let looks_textual = content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json") || ct.contains("text"))
            || body_bytes.first().is_some_and(|b| *b == b'{' || *b == b'[');

        entry.status = Some(status);
        entry.response_headers = headers;
        entry.content_type = content_type;
        entry.body = if body_bytes.is_empty() {
            BodyStorage::Discarded
        } else if body_bytes.len() <= CAPTURE_MAX_BODY_BYTES && looks_textual {
            String::from_utf8(body_bytes.to_vec())
                .map(BodyStorage::Text)
                .unwrap_or(BodyStorage::Discarded)
        } else if body_bytes.len() <= CAPTURE_MAX_BODY_BYTES {
            use base64::Engine;
            BodyStorage::Base64(base64::engine::general_purpose::STANDARD.encode(body_bytes))
        } else {
            BodyStorage::Discarded
        };

        let added = entry.estimated_bytes();
        drop(entry);
        *self.state.bytes_estimate.lock() += added;
        self.evict_if_needed();
    }

    fn insert(&self, entry: CapturedEntry) {
        let id = entry.id;
        self.state.order.lock().push(id);
        self.state.entries.insert(id, entry);
        self.evict_if_needed();
    }

    fn evict_if_needed(&self) {
        let mut order = self.state.order.lock();
        let mut bytes = self.state.bytes_estimate.lock();
        while order.len() > CAPTURE_MAX_ENTRIES || *bytes > CAPTURE_MAX_BYTES {
            if order.is_empty() {
                break;
            }
            let oldest = order.remove(0);
            if let Some((_, entry)) = self.state.entries.remove(&oldest) {
                *bytes = bytes.saturating_sub(entry.estimated_bytes());
            }
        }
    }

    #[must_use]
    pub fn list(&self, limit: usize, filter: CaptureFilter) -> Vec<CaptureSummary> {
        let order = self.state.order.lock();
        order
            .iter()
            .rev()
            .filter_map(|id| self.state.entries.get(id))
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .map(|entry| CaptureSummary::from(&*entry))
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<CaptureSummary> {
        self.state.entries.get(&id).map(|entry| CaptureSummary::from(&*entry))
    }

    /// Find the first/last entry (by arrival order) matching `where_`.
    #[must_use]
    pub fn find(&self, where_: &NetworkWhere, pick: Pick) -> Option<u64> {
        let order = self.state.order.lock();
        let ids: Box<dyn Iterator<Item = &u64>> = match pick {
            Pick::First => Box::new(order.iter()),
            Pick::Last => Box::new(order.iter().rev()),
        };
        ids.filter_map(|id| self.state.entries.get(id).map(|e| (*id, matches_where(&e, where_))))
            .find(|(_, matched)| *matched)
            .map(|(id, _)| id)
    }

    #[must_use]
    pub fn response_body(&self, id: u64) -> Option<String> {
        self.state.entries.get(&id).and_then(|e| e.decoded_text())
    }

    /// Request headers, redacted of sensitive values (for replay-override
    /// validation and snapshotting).
    #[must_use]
    pub fn request_headers(&self, id: u64) -> Option<HashMap<String, String>> {
        self.state.entries.get(&id).map(|e| e.request_headers.clone())
    }

    /// The original request body recorded alongside `id`, if any.
    #[must_use]
    pub fn request_body(&self, id: u64) -> Option<String> {
        self.state.entries.get(&id).and_then(|e| e.request_body.clone())
    }

    #[must_use]
    pub fn export(&self, id: u64) -> Option<ExportedEntry> {
        self.state.entries.get(&id).map(|e| ExportedEntry(e.clone()))
    }

    pub fn import(&self, exported: ExportedEntry) -> u64 {
        let id = exported.0.id;
        self.insert(exported.0);
        id
    }
}

fn matches_where(entry: &CapturedEntry, where_: &NetworkWhere) -> bool {
    if let Some(substr) = &where_.url_includes {
        if !entry.url.contains(substr.as_str()) {
            return false;
        }
    }
    if let Some(pattern) = &where_.url_matches {
        match regex::Regex::new(pattern) {
            Ok(re) if re.is_match(&entry.url) => {}
            _ => return false,
        }
    }
    if let Some(method) = &where_.method {
        if !entry.method.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    if let Some(resource_type) = &where_.resource_type {
        if !entry.resource_type.eq_ignore_ascii_case(resource_type) {
            return false;
        }
    }
    if let Some(status) = where_.status {
        if entry.status != Some(status) {
            return false;
        }
    }
    true
}

/// Refuse a replay override that would set a sensitive header.
pub fn check_no_sensitive_header_overrides(set_headers: &HashMap<String, String>) -> Result<()> {
    for name in set_headers.keys() {
        if crate::utils::constants::is_sensitive_header(name) {
            return Err(ShowRunError::ReplayError(format!(
                "overrides.setHeaders may not set sensitive header '{name}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(capture: &NetworkCapture, url: &str, method: &str) -> u64 {
        capture.record_request(method, url, "fetch", HashMap::new(), None)
    }

    #[test]
    fn find_last_returns_most_recently_arrived_match() {
        let capture = NetworkCapture::new();
        sample_request(&capture, "https://x.test/api/companies", "POST");
        let second = sample_request(&capture, "https://x.test/api/companies", "POST");

        let where_ = NetworkWhere { url_includes: Some("/api/companies".into()), method: Some("POST".into()), ..Default::default() };
        let found = capture.find(&where_, Pick::Last).unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn find_returns_none_when_nothing_matches() {
        let capture = NetworkCapture::new();
        sample_request(&capture, "https://x.test/home", "GET");
        let where_ = NetworkWhere { url_includes: Some("/api/".into()), ..Default::default() };
        assert!(capture.find(&where_, Pick::Last).is_none());
    }

    #[test]
    fn response_body_decodes_text_storage() {
        let capture = NetworkCapture::new();
        let id = sample_request(&capture, "https://x.test/api/data", "GET");
        capture.record_response(id, 200, HashMap::new(), Some("application/json".into()), br#"{"ok":true}"#);
        assert_eq!(capture.response_body(id).as_deref(), Some(r#"{"ok":true}"#));
    }

    #[test]
    fn oversized_body_is_discarded() {
        let capture = NetworkCapture::new();
        let id = sample_request(&capture, "https://x.test/api/big", "GET");
        let huge = vec![b'a'; CAPTURE_MAX_BODY_BYTES + 1];
        capture.record_response(id, 200, HashMap::new(), Some("text/plain".into()), &huge);
        assert!(capture.response_body(id).is_none());
    }

    #[test]
    fn eviction_drops_oldest_entry_past_capacity() {
        let capture = NetworkCapture::new();
        let first = sample_request(&capture, "https://x.test/1", "GET");
        for i in 0..CAPTURE_MAX_ENTRIES {
            sample_request(&capture, &format!("https://x.test/{i}"), "GET");
        }
        assert!(capture.get(first).is_none());
    }

    #[test]
    fn sensitive_header_override_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer x".to_string());
        assert!(check_no_sensitive_header_overrides(&headers).is_err());
    }

    #[test]
    fn request_body_is_retrievable_after_recording() {
        let capture = NetworkCapture::new();
        let id = capture.record_request("POST", "https://x.test/api/companies", "fetch", HashMap::new(), Some(r#"{"page":1}"#.to_string()));
        assert_eq!(capture.request_body(id).as_deref(), Some(r#"{"page":1}"#));
    }

    #[test]
    fn export_import_round_trips_entry() {
        let capture = NetworkCapture::new();
        let id = sample_request(&capture, "https://x.test/api/data", "GET");
        let exported = capture.export(id).unwrap();
        let other = NetworkCapture::new();
        let imported_id = other.import(exported);
        assert_eq!(imported_id, id);
        assert!(other.get(id).is_some());
    }
}
