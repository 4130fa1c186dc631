//! Flow structural & referential validation
//!
//! Validation aggregates every error it finds rather than failing on the
//! first one, so a pack author sees the whole list in one pass.

use std::collections::HashSet;

use crate::error::{ErrorKind, Result, ShowRunError};

use super::flow::{FlowDocument, SkipIf, StepParams};
use super::manifest::TaskpackManifest;

/// Validate a loaded manifest + flow document. Returns the aggregated list of
/// problems as a single [`ShowRunError::FlowValidationError`] if any are
/// found.
pub fn validate(manifest: &TaskpackManifest, flow: &FlowDocument) -> Result<()> {
    let mut problems = Vec::new();

    check_unique_step_ids(flow, &mut problems);
    check_out_collectible_correspondence(flow, &mut problems);
    check_network_replay_request_ids(flow, &mut problems);
    check_retry_only_on(flow, &mut problems);
    check_jmespath_syntax(flow, &mut problems);
    if let Some(policy) = manifest.auth.policy.as_ref() {
        check_recovery_flow(&policy.recovery_flow, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ShowRunError::FlowValidationError(problems.join("\n")))
    }
}

fn check_unique_step_ids(flow: &FlowDocument, problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for step in &flow.flow {
        if !seen.insert(step.id.as_str()) {
            problems.push(format!("duplicate step id '{}'", step.id));
        }
    }
}

/// Every declared collectible must be written by exactly one step's `out`;
/// every step's `out` must name a declared collectible.
fn check_out_collectible_correspondence(flow: &FlowDocument, problems: &mut Vec<String>) {
    let declared: HashSet<&str> = flow.collectibles.iter().map(|c| c.name.as_str()).collect();
    let mut written = HashSet::new();

    for step in &flow.flow {
        if let Some(out) = step.params.out_collectible() {
            if !declared.contains(out) {
                problems.push(format!(
                    "step '{}' writes undeclared collectible '{out}'",
                    step.id
                ));
            }
            written.insert(out);
        }
    }

    for name in &declared {
        if !written.contains(name) {
            problems.push(format!("declared collectible '{name}' is never written"));
        }
    }
}

/// `network_replay.requestId` templates referencing `{{vars.X}}` must name a
/// variable a prior `network_find.saveAs` actually produces.
fn check_network_replay_request_ids(flow: &FlowDocument, problems: &mut Vec<String>) {
    let mut saved_vars = HashSet::new();

    for step in &flow.flow {
        match &step.params {
            StepParams::NetworkFind(p) => {
                saved_vars.insert(p.save_as.as_str());
            }
            StepParams::NetworkReplay(p) => {
                if let Some(var_name) = extract_single_var_ref(&p.request_id) {
                    if !saved_vars.contains(var_name) {
                        problems.push(format!(
                            "step '{}' requestId references undefined var '{var_name}'",
                            step.id
                        ));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Pull the variable name out of a `requestId` that is exactly `{{vars.NAME}}`.
/// Anything more elaborate is left to runtime template resolution.
fn extract_single_var_ref(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    inner.strip_prefix("vars.")
}

fn check_retry_only_on(flow: &FlowDocument, problems: &mut Vec<String>) {
    for step in &flow.flow {
        if let Some(retry) = &step.retry {
            if let Some(only_on) = &retry.only_on {
                for kind_name in only_on {
                    if kind_name.parse::<ErrorKind>().is_err() {
                        problems.push(format!(
                            "step '{}' retry.onlyOn has unknown error kind '{kind_name}'",
                            step.id
                        ));
                    }
                }
            }
        }
    }
}

/// Every JMESPath `path` expression (network_find/network_replay/network_extract
/// results) must parse.
fn check_jmespath_syntax(flow: &FlowDocument, problems: &mut Vec<String>) {
    for step in &flow.flow {
        let path = match &step.params {
            StepParams::NetworkReplay(p) => p.response.path.as_deref(),
            StepParams::NetworkExtract(p) => p.path.as_deref(),
            _ => None,
        };
        if let Some(expr) = path {
            if let Err(e) = jmespath::compile(expr) {
                problems.push(format!("step '{}' has invalid JMESPath '{expr}': {e}", step.id));
            }
        }
    }
}

fn check_recovery_flow(recovery_flow: &[super::flow::Step], problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for step in recovery_flow {
        if !seen.insert(step.id.as_str()) {
            problems.push(format!("duplicate step id '{}' in recovery flow", step.id));
        }
        if step.once {
            problems.push(format!(
                "recovery flow step '{}' may not set once=true",
                step.id
            ));
        }
    }
}

/// Recursively collect every leaf `skip_if` reference for steps that target
/// elements, used by [`check_out_collectible_correspondence`]'s sibling
/// checks in the interpreter (kept here for reuse by future validators).
#[allow(dead_code)]
fn flatten_skip_if(skip_if: &SkipIf, out: &mut Vec<&SkipIf>) {
    match skip_if {
        SkipIf::All(children) | SkipIf::Any(children) => {
            for child in children {
                flatten_skip_if(child, out);
            }
        }
        leaf => out.push(leaf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::flow::{CollectibleDecl, ExtractTitleParams, ScalarType, Step};
    use crate::pack::manifest::TaskpackManifest;

    fn manifest() -> TaskpackManifest {
        TaskpackManifest {
            id: "demo".into(),
            version: "1.0.0".into(),
            description: None,
            browser: Default::default(),
            auth: Default::default(),
            secrets: vec![],
            metadata: Default::default(),
        }
    }

    fn extract_title_step(id: &str, out: &str) -> Step {
        Step {
            id: id.into(),
            params: StepParams::ExtractTitle(ExtractTitleParams { out: out.into() }),
            label: None,
            once: false,
            skip_if: None,
            retry: None,
        }
    }

    #[test]
    fn detects_duplicate_step_ids() {
        let flow = FlowDocument {
            inputs: Default::default(),
            collectibles: vec![CollectibleDecl { name: "title".into(), value_type: ScalarType::String, description: None }],
            flow: vec![extract_title_step("s1", "title"), extract_title_step("s1", "title")],
        };
        let err = validate(&manifest(), &flow).unwrap_err();
        assert!(matches!(err, ShowRunError::FlowValidationError(msg) if msg.contains("duplicate step id")));
    }

    #[test]
    fn detects_undeclared_out_collectible() {
        let flow = FlowDocument {
            inputs: Default::default(),
            collectibles: vec![],
            flow: vec![extract_title_step("s1", "title")],
        };
        let err = validate(&manifest(), &flow).unwrap_err();
        assert!(matches!(err, ShowRunError::FlowValidationError(msg) if msg.contains("undeclared collectible")));
    }

    #[test]
    fn detects_declared_collectible_never_written() {
        let flow = FlowDocument {
            inputs: Default::default(),
            collectibles: vec![CollectibleDecl { name: "never_written".into(), value_type: ScalarType::String, description: None }],
            flow: vec![],
        };
        let err = validate(&manifest(), &flow).unwrap_err();
        assert!(matches!(err, ShowRunError::FlowValidationError(msg) if msg.contains("never written")));
    }

    #[test]
    fn valid_flow_passes() {
        let flow = FlowDocument {
            inputs: Default::default(),
            collectibles: vec![CollectibleDecl { name: "title".into(), value_type: ScalarType::String, description: None }],
            flow: vec![extract_title_step("s1", "title")],
        };
        assert!(validate(&manifest(), &flow).is_ok());
    }
}
