//! `skip_if` predicate evaluation
//!
//! All predicates are side-effect-free. `element_visible`/`element_exists`
//! reuse the driver's target resolver but cap the wait at a short stability
//! window rather than a step's full interaction timeout.

use std::time::Duration;

use crate::driver::BrowserDriver;
use crate::error::Result;
use crate::interpreter::state::RunState;
use crate::pack::flow::SkipIf;

/// `element_*` predicates never wait beyond this window.
const STABILITY_WINDOW: Duration = Duration::from_millis(500);

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate one `skip_if` predicate against current state and driver.
pub async fn evaluate(skip_if: &SkipIf, state: &RunState, driver: &mut dyn BrowserDriver) -> Result<bool> {
    Ok(match skip_if {
        SkipIf::UrlIncludes(substr) => driver.current_url().contains(substr.as_str()),
        SkipIf::UrlMatches(pattern) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&driver.current_url())),
        SkipIf::ElementVisible(locator) => {
            let target = locator.resolve()?;
            driver
                .assert_target(Some(&target), Some(true), None, None, STABILITY_WINDOW)
                .await
                .unwrap_or(false)
        }
        SkipIf::ElementExists(locator) => {
            // The chromiumoxide driver's resolver doesn't distinguish hidden
            // elements from absent ones, so this is identical to
            // `element_visible` today; kept as a separate predicate so a
            // future resolver with real visibility detection can diverge.
            let target = locator.resolve()?;
            driver
                .assert_target(Some(&target), Some(true), None, None, STABILITY_WINDOW)
                .await
                .unwrap_or(false)
        }
        SkipIf::VarEquals { name, value } => state.vars.get(name) == Some(value),
        SkipIf::VarTruthy(name) => state.vars.get(name).is_some_and(is_truthy),
        SkipIf::VarFalsy(name) => !state.vars.get(name).is_some_and(is_truthy),
        SkipIf::All(predicates) => {
            let mut all_true = true;
            for predicate in predicates {
                if !Box::pin(evaluate(predicate, state, driver)).await? {
                    all_true = false;
                    break;
                }
            }
            all_true
        }
        SkipIf::Any(predicates) => {
            let mut any_true = false;
            for predicate in predicates {
                if Box::pin(evaluate(predicate, state, driver)).await? {
                    any_true = true;
                    break;
                }
            }
            any_true
        }
    })
}
