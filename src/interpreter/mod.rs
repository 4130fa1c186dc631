//! Flow interpreter: the per-step lifecycle driving a loaded [`FlowDocument`]
//! through a [`BrowserDriver`]
//!
//! Lifecycle per step: evaluate `skip_if` -> check the once-cache -> resolve
//! templates -> dispatch -> on failure, check retry policy and roll back to
//! the pre-dispatch checkpoint -> persist writes -> advance. The auth
//! resilience controller, when present, gets first look at every dispatch
//! failure before the step's own retry policy is consulted, and also gets a
//! proactive look after every successful dispatch via its guard check.

pub mod dispatch;
pub mod handlers;
pub mod json_path;
pub mod retry;
pub mod skip_if;
pub mod state;

use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

use crate::auth::AuthResilienceController;
use crate::driver::BrowserDriver;
use crate::error::{Result, ShowRunError};
use crate::events::{EventBus, RunEvent, SkipReason};
use crate::pack::flow::{FlowDocument, Step};
use crate::snapshot::SnapshotStore;

use state::RunState;

/// Everything that survives a flow run ending in failure, carried into the
/// failure enrichment (`{failedStepId, stepsExecuted, partialCollectibles}`).
#[derive(Debug)]
pub struct InterpretError {
    pub error: ShowRunError,
    pub failed_step_id: Option<String>,
}

/// Run every step of `flow` in order against `driver`, persisting writes into
/// `state`. Returns `Ok(())` once every step has executed (or been skipped);
/// `Err` carries the step id active at the time of failure.
pub async fn run_flow(
    run_id: Uuid,
    flow: &FlowDocument,
    state: &mut RunState,
    driver: &mut dyn BrowserDriver,
    secrets: &HashMap<String, String>,
    events: &EventBus,
    mut snapshot_out: Option<&mut SnapshotStore>,
    mut auth: Option<&mut AuthResilienceController>,
) -> std::result::Result<(), InterpretError> {
    for step in &flow.flow {
        if let Err(err) = run_one_step(run_id, step, state, driver, secrets, events, snapshot_out.as_deref_mut(), auth.as_deref_mut()).await {
            let _ = events.publish(RunEvent::error(run_id, Some(step.id.clone()), &err.to_string(), &secret_values(secrets)));
            return Err(InterpretError { error: err, failed_step_id: Some(step.id.clone()) });
        }
    }
    Ok(())
}

fn secret_values(secrets: &HashMap<String, String>) -> Vec<&str> {
    secrets.values().map(String::as_str).collect()
}

async fn run_one_step(
    run_id: Uuid,
    step: &Step,
    state: &mut RunState,
    driver: &mut dyn BrowserDriver,
    secrets: &HashMap<String, String>,
    events: &EventBus,
    mut snapshot_out: Option<&mut SnapshotStore>,
    mut auth: Option<&mut AuthResilienceController>,
) -> Result<()> {
    if let Some(skip_if) = &step.skip_if {
        if skip_if::evaluate(skip_if, state, driver).await? {
            let restored_keys = state.restore_once(&step.id);
            let _ = events.publish(RunEvent::StepSkipped { run_id, step_id: step.id.clone(), reason: SkipReason::ConditionMet, restored_keys });
            return Ok(());
        }
    }
    if step.once && state.has_run_once(&step.id) {
        let restored_keys = state.restore_once(&step.id);
        let _ = events.publish(RunEvent::StepSkipped { run_id, step_id: step.id.clone(), reason: SkipReason::OnceAlreadyExecuted, restored_keys });
        return Ok(());
    }

    let _ = events.publish(RunEvent::StepStarted { run_id, step_id: step.id.clone(), kind: step.params.kind_name().to_string() });
    let started = Instant::now();

    let mut attempts_used = 0u32;
    let mut post_recovery_retries = 0u32;
    let checkpoint = state.checkpoint();
    let result = loop {
        let attempt = dispatch::dispatch(&step.id, &step.params, state, driver, secrets, snapshot_out.as_deref_mut()).await;
        match attempt {
            Ok(writes) => {
                if let Some(controller) = auth.as_deref_mut() {
                    if controller.guard_tripped(driver).await {
                        controller.recover(run_id, state, driver, secrets, events).await?;
                    }
                }
                break Ok(writes);
            }
            Err(error) => {
                let mut retried_via_recovery = false;
                if let Some(controller) = auth.as_deref_mut() {
                    if controller.is_auth_failure(&error) && post_recovery_retries < controller.max_step_retry_after_recovery() {
                        let recovered = controller.recover(run_id, state, driver, secrets, events).await?;
                        if recovered {
                            post_recovery_retries += 1;
                            state.restore_checkpoint(checkpoint.clone());
                            retried_via_recovery = true;
                        }
                    }
                }
                if retried_via_recovery {
                    continue;
                }
                let Some(policy) = &step.retry else { break Err(error) };
                if !retry::should_retry(policy, &error, attempts_used) {
                    break Err(error);
                }
                attempts_used += 1;
                state.restore_checkpoint(checkpoint.clone());
                tokio::time::sleep(std::time::Duration::from_millis(policy.delay_ms)).await;
            }
        }
    };

    let writes = result?;
    state.apply_writes(&step.id, step.once, writes);
    state.steps_executed.push(step.id.clone());
    let _ = events.publish(RunEvent::StepFinished { run_id, step_id: step.id.clone(), duration_ms: started.elapsed().as_millis() as u64 });
    Ok(())
}
