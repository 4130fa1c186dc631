//! Auth-failure recovery loop
//!
//! Two independent signals feed recovery: a *proactive* guard checked after
//! every successfully dispatched step (does the page now look logged out?),
//! and a *reactive* policy applied to `network_replay` response status codes.
//! Either signal runs the pack's `recovery_flow` in a fresh local var scope
//! that shares the driver's browser session (cookies travel with the page,
//! not with `RunState`), then hands control back to the interpreter. Recovery
//! never triggers recovery: [`AuthResilienceController::recover`] does not
//! re-check its own guard while running the recovery sub-flow.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::driver::BrowserDriver;
use crate::error::{ErrorKind, Result, ShowRunError};
use crate::events::{EventBus, RunEvent};
use crate::interpreter::dispatch;
use crate::interpreter::state::{OnceCache, RunState};
use crate::pack::manifest::AuthConfig;

/// Tracks how many recoveries this run has spent and the last recovery's
/// timestamp, enforcing `maxRecoveriesPerRun` and `cooldownMs`.
pub struct AuthResilienceController {
    config: AuthConfig,
    recoveries_used: u32,
    last_recovery_at: Option<Instant>,
}

impl AuthResilienceController {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config, recoveries_used: 0, last_recovery_at: None }
    }

    /// Whether `error` is a signal this controller should react to: an
    /// explicit [`ShowRunError::AuthFailure`], or a `network_replay` response
    /// validation failure whose message names a configured status code.
    #[must_use]
    pub fn is_auth_failure(&self, error: &ShowRunError) -> bool {
        if error.kind() == ErrorKind::AuthFailure {
            return true;
        }
        let Some(policy) = &self.config.policy else { return false };
        if let ShowRunError::ResponseValidationError(message) = error {
            return policy.on_status_codes.iter().any(|code| message.contains(&code.to_string()));
        }
        false
    }

    /// Proactive check: does the page currently look logged out, independent
    /// of any step's own outcome.
    pub async fn guard_tripped(&self, driver: &mut dyn BrowserDriver) -> bool {
        let Some(guard) = &self.config.guard else { return false };
        if let Some(substr) = &guard.url_includes {
            if driver.current_url().contains(substr.as_str()) {
                return true;
            }
        }
        if let Some(target) = &guard.target {
            if driver
                .assert_target(Some(target), Some(true), None, None, Duration::from_millis(500))
                .await
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Run the pack's recovery sub-flow once, if budget and cooldown allow.
    /// Returns `Ok(true)` if recovery ran and completed without error,
    /// `Ok(false)` if the budget/cooldown refused another attempt (the caller
    /// should surface the original failure), and `Err` if the recovery
    /// sub-flow itself failed.
    pub async fn recover(
        &mut self,
        run_id: Uuid,
        state: &mut RunState,
        driver: &mut dyn BrowserDriver,
        secrets: &HashMap<String, String>,
        events: &EventBus,
    ) -> Result<bool> {
        let Some(policy) = self.config.policy.clone() else { return Ok(false) };

        if self.recoveries_used >= policy.max_recoveries_per_run {
            let _ = events.publish(RunEvent::AuthRecoveryExhausted {
                run_id,
                step_id: state.steps_executed.last().cloned().unwrap_or_default(),
            });
            return Ok(false);
        }
        if let Some(last) = self.last_recovery_at {
            let elapsed = last.elapsed();
            let cooldown = Duration::from_millis(policy.cooldown_ms);
            if elapsed < cooldown {
                tokio::time::sleep(cooldown - elapsed).await;
            }
        }

        let _ = events.publish(RunEvent::AuthFailureDetected {
            run_id,
            step_id: state.steps_executed.last().cloned().unwrap_or_default(),
        });
        let _ = events.publish(RunEvent::AuthRecoveryStarted { run_id });

        self.recoveries_used += 1;
        self.last_recovery_at = Some(Instant::now());

        // Fresh local var scope: recovery writes never leak into the main
        // flow's vars/collectibles and the main once-cache is untouched.
        let mut recovery_state = RunState::new(state.inputs.clone(), OnceCache::new());
        let mut outcome = Ok(());
        for step in &policy.recovery_flow {
            if let Err(error) = dispatch::dispatch(&step.id, &step.params, &mut recovery_state, driver, secrets, None).await {
                outcome = Err(error);
                break;
            }
        }

        let success = outcome.is_ok();
        let _ = events.publish(RunEvent::AuthRecoveryFinished { run_id, success });
        outcome.map(|()| success)
    }

    #[must_use]
    pub fn max_step_retry_after_recovery(&self) -> u32 {
        self.config.policy.as_ref().map_or(0, |p| p.max_step_retry_after_recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::manifest::AuthPolicyConfig;

    fn policy(max_recoveries: u32) -> AuthPolicyConfig {
        AuthPolicyConfig {
            on_status_codes: vec![401, 403],
            recovery_flow: vec![],
            max_recoveries_per_run: max_recoveries,
            max_step_retry_after_recovery: 1,
            cooldown_ms: 0,
        }
    }

    #[test]
    fn explicit_auth_failure_is_recognized() {
        let controller = AuthResilienceController::new(AuthConfig::default());
        assert!(controller.is_auth_failure(&ShowRunError::AuthFailure));
    }

    #[test]
    fn response_validation_error_matches_configured_status_code() {
        let controller = AuthResilienceController::new(AuthConfig { guard: None, policy: Some(policy(1)) });
        let error = ShowRunError::ResponseValidationError("expected status 200, got 401".into());
        assert!(controller.is_auth_failure(&error));
    }

    #[tokio::test]
    async fn recovery_budget_exhausts_after_max_recoveries_per_run() {
        let mut controller = AuthResilienceController::new(AuthConfig { guard: None, policy: Some(policy(0)) });
        let events = EventBus::new(16);
        let mut state = RunState::new(serde_json::Map::new(), OnceCache::new());
        let secrets = HashMap::new();
        struct NoDriver;
        #[async_trait::async_trait]
        impl BrowserDriver for NoDriver {
            async fn navigate(&mut self, _: &str, _: Option<crate::pack::flow::WaitUntil>, _: Duration) -> Result<()> { Ok(()) }
            async fn wait_for(&mut self, _: Option<&crate::pack::flow::Target>, _: Option<&str>, _: Option<crate::pack::flow::WaitUntil>, _: Option<bool>, _: Duration) -> Result<()> { Ok(()) }
            async fn click(&mut self, _: &crate::pack::flow::Target, _: bool, _: Duration) -> Result<()> { Ok(()) }
            async fn fill(&mut self, _: &crate::pack::flow::Target, _: &str, _: bool, _: Duration) -> Result<()> { Ok(()) }
            async fn select_option(&mut self, _: &crate::pack::flow::Target, _: &str, _: bool, _: Duration) -> Result<()> { Ok(()) }
            async fn press_key(&mut self, _: Option<&crate::pack::flow::Target>, _: &str, _: u32, _: Duration, _: Duration) -> Result<()> { Ok(()) }
            async fn upload_file(&mut self, _: &crate::pack::flow::Target, _: &[String], _: Duration) -> Result<()> { Ok(()) }
            async fn enter_frame(&mut self, _: &crate::pack::flow::Target, _: Duration) -> Result<()> { Ok(()) }
            async fn exit_frame(&mut self) -> Result<()> { Ok(()) }
            async fn new_tab(&mut self, _: &str, _: Duration) -> Result<usize> { Ok(0) }
            async fn switch_tab(&mut self, _: usize, _: bool) -> Result<()> { Ok(()) }
            async fn extract_title(&mut self) -> Result<String> { Ok(String::new()) }
            async fn extract_text(&mut self, _: &crate::pack::flow::Target, _: bool, _: bool, _: Duration) -> Result<Option<String>> { Ok(None) }
            async fn extract_attribute(&mut self, _: &crate::pack::flow::Target, _: &str, _: bool, _: Duration) -> Result<Option<String>> { Ok(None) }
            async fn assert_target(&mut self, _: Option<&crate::pack::flow::Target>, _: Option<bool>, _: Option<&str>, _: Option<&str>, _: Duration) -> Result<bool> { Ok(false) }
            fn current_url(&self) -> String { String::new() }
            fn capture(&self) -> std::sync::Arc<crate::capture::NetworkCapture> { std::sync::Arc::new(crate::capture::NetworkCapture::new()) }
            async fn replay_in_browser_context(&self, _: &crate::driver::EffectiveRequest, _: Duration) -> Result<crate::driver::ReplayResponse> {
                Ok(crate::driver::ReplayResponse { status: 200, headers: HashMap::new(), body: vec![] })
            }
            async fn close(&mut self) -> Result<()> { Ok(()) }
        }
        let mut driver = NoDriver;
        let recovered = controller.recover(Uuid::nil(), &mut state, &mut driver, &secrets, &events).await.unwrap();
        assert!(!recovered);
    }
}
