//! Secret file loading
//!
//! Secrets live outside the pack, in a sibling `.secrets.json` the host
//! supplies. Loaded synchronously since pack loading happens once, up front,
//! before the interpreter starts.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, ShowRunError};

#[cfg(unix)]
fn warn_on_loose_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            tracing::warn!(path = %path.display(), mode = format!("{mode:o}"), "secrets file is readable by group/other");
        }
    }
}

#[cfg(not(unix))]
fn warn_on_loose_permissions(_path: &Path) {}

#[derive(serde::Deserialize)]
struct SecretsFile {
    #[allow(dead_code)]
    version: u32,
    secrets: HashMap<String, String>,
}

/// Load `.secrets.json`'s `{version: 1, secrets: {NAME: value, ...}}` shape.
/// Missing file is not an error here; callers decide whether an unfulfilled
/// `required` secret declaration fails validation.
pub fn load_secrets_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    warn_on_loose_permissions(path);

    let contents = std::fs::read_to_string(path)
        .map_err(|e| ShowRunError::MissingFile(format!("{}: {e}", path.display())))?;
    let parsed: SecretsFile = serde_json::from_str(&contents)
        .map_err(|e| ShowRunError::SchemaError(format!("invalid secrets file {}: {e}", path.display())))?;
    Ok(parsed.secrets)
}

/// Resolve secret declarations against the loaded file and process
/// environment, preferring the file. Errors on the first unfulfilled
/// `required` declaration.
pub fn resolve_secrets(
    declared: &[super::manifest::SecretDecl],
    from_file: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    for decl in declared {
        let value = from_file
            .get(&decl.name)
            .cloned()
            .or_else(|| std::env::var(&decl.name).ok());
        match value {
            Some(v) => {
                resolved.insert(decl.name.clone(), v);
            }
            None if decl.required => {
                return Err(ShowRunError::MissingRequiredSecret(decl.name.clone()));
            }
            None => {}
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::manifest::SecretDecl;

    #[test]
    fn missing_file_yields_empty_map() {
        let result = load_secrets_file(Path::new("/nonexistent/.secrets.json")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn required_secret_missing_everywhere_errors() {
        let declared = vec![SecretDecl { name: "API_KEY".into(), required: true, source: None }];
        let from_file = HashMap::new();
        let err = resolve_secrets(&declared, &from_file).unwrap_err();
        assert!(matches!(err, ShowRunError::MissingRequiredSecret(name) if name == "API_KEY"));
    }

    #[test]
    fn file_value_takes_precedence_over_declaration_defaults() {
        let declared = vec![SecretDecl { name: "API_KEY".into(), required: true, source: None }];
        let mut from_file = HashMap::new();
        from_file.insert("API_KEY".to_string(), "from-file".to_string());
        let resolved = resolve_secrets(&declared, &from_file).unwrap();
        assert_eq!(resolved.get("API_KEY"), Some(&"from-file".to_string()));
    }

    #[test]
    fn optional_secret_not_found_is_silently_skipped() {
        let declared = vec![SecretDecl { name: "OPTIONAL".into(), required: false, source: None }];
        let resolved = resolve_secrets(&declared, &HashMap::new()).unwrap();
        assert!(resolved.is_empty());
    }
}
