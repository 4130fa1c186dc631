//! Step handlers that touch neither a [`crate::driver::BrowserDriver`] nor
//! HTTP — shared between browser-mode dispatch and HTTP-only replay, since
//! `set_var`/`sleep`/`network_extract` are exactly the kinds allowed in both
//! modes.

use std::time::Duration;

use crate::error::Result;
use crate::interpreter::json_path;
use crate::interpreter::state::StepWrites;
use crate::pack::flow::{NetworkExtractParams, SetVarParams, SleepParams};
use crate::template::{self, TemplateContext};

pub fn set_var(params: &SetVarParams, ctx: &TemplateContext<'_>) -> Result<StepWrites> {
    let value = match &params.value {
        serde_json::Value::String(s) => serde_json::Value::String(template::resolve(s, ctx)?),
        other => other.clone(),
    };
    Ok(StepWrites::var(params.name.clone(), value))
}

pub async fn sleep(params: &SleepParams) {
    tokio::time::sleep(Duration::from_millis(params.duration_ms)).await;
}

pub fn network_extract(params: &NetworkExtractParams, vars: &serde_json::Map<String, serde_json::Value>, hints: &mut Vec<String>) -> Result<StepWrites> {
    let raw = match vars.get(&params.from_var) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => {
            hints.push(format!("network_extract: var '{}' is not set", params.from_var));
            String::new()
        }
    };
    let parsed = json_path::parse_body(params.as_, &raw);
    let projected = json_path::apply_path(&parsed, params.path.as_deref(), hints);
    Ok(StepWrites::collectible(params.out.clone(), projected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn set_var_resolves_template_strings() {
        let inputs = json!({"batch": "S25"}).as_object().unwrap().clone();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let ctx = TemplateContext::new(&inputs, &vars, &secrets);
        let params = SetVarParams { name: "x".into(), value: json!("batch={{inputs.batch}}") };
        let writes = set_var(&params, &ctx).unwrap();
        assert_eq!(writes.vars.get("x"), Some(&json!("batch=S25")));
    }

    #[test]
    fn network_extract_reads_string_var_and_projects() {
        let mut vars = serde_json::Map::new();
        vars.insert("raw".into(), json!(r#"{"results":[{"name":"Acme"}]}"#));
        let params = NetworkExtractParams {
            from_var: "raw".into(),
            as_: crate::pack::flow::ResponseAs::Json,
            path: Some("results[*].name".into()),
            out: "names".into(),
        };
        let mut hints = Vec::new();
        let writes = network_extract(&params, &vars, &mut hints).unwrap();
        assert_eq!(writes.collectibles.get("names"), Some(&json!(["Acme"])));
    }
}
