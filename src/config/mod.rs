//! `run()`'s top-level options
//!
//! A plain fluent builder: unlike the pack-loading types, nothing here has a
//! required-before-optional field ordering worth enforcing at the type level.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

/// Options controlling a single `run()` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_dir: PathBuf,
    pub headless: bool,
    pub cancellation_token: Option<CancellationToken>,
    pub session_id: Option<String>,
    pub profile_id: Option<String>,
    pub skip_http_replay: bool,
    pub cdp_url: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_dir: std::env::temp_dir().join("showrun_run"),
            headless: true,
            cancellation_token: None,
            session_id: None,
            profile_id: None,
            skip_http_replay: false,
            cdp_url: None,
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    /// True if the signal has fired; interpreted between steps only, never
    /// interrupting mid-step.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[derive(Debug, Default)]
pub struct RunOptionsBuilder {
    options: RunOptions,
}

impl RunOptionsBuilder {
    #[must_use]
    pub fn run_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.run_dir = dir.into();
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.options.headless = headless;
        self
    }

    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.options.cancellation_token = Some(token);
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.options.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn profile_id(mut self, profile_id: impl Into<String>) -> Self {
        self.options.profile_id = Some(profile_id.into());
        self
    }

    #[must_use]
    pub fn skip_http_replay(mut self, skip: bool) -> Self {
        self.options.skip_http_replay = skip;
        self
    }

    #[must_use]
    pub fn cdp_url(mut self, url: impl Into<String>) -> Self {
        self.options.cdp_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn build(self) -> RunOptions {
        self.options
    }
}
