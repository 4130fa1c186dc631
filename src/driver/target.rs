//! Target resolution against a live `chromiumoxide::Page`
//!
//! A small JS snippet, run via `page.evaluate`, tags every matching element with a unique
//! `data-showrun-match` attribute, then `Page::find_elements` retrieves the
//! tagged `ElementHandle`s via that attribute selector. `within` and `near`
//! reuse the same tagging mechanism: a scope target is tagged with its own
//! attribute first, and the primary match is only written when `el.closest()`
//! finds that scope attribute on an ancestor; `near` tags a second target and
//! records each match's DOM-node distance to the closest such element so the
//! caller can sort by it.

use chromiumoxide::element::Element;
use chromiumoxide::Page;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, ShowRunError};
use crate::pack::flow::{Target, TargetKind};

static NEXT_MATCH_TAG: AtomicU64 = AtomicU64::new(1);

fn next_tag() -> String {
    format!("t{}", NEXT_MATCH_TAG.fetch_add(1, Ordering::SeqCst))
}

/// Build the JS statements that tag every element matching `kind` with
/// `attr="tag"`, additionally requiring `guard` (a JS boolean expression over
/// the in-scope `el`) to hold.
fn kind_statements(kind: &TargetKind, attr: &str, tag: &str, guard: &str) -> String {
    match kind {
        TargetKind::Css { selector } => format!(
            r"document.querySelectorAll({selector:?}).forEach(el => {{
                if ({guard}) el.setAttribute({attr:?}, {tag:?});
            }});"
        ),
        TargetKind::Role { role, name } => {
            let name_check = match name {
                Some(n) => format!("&& (el.textContent || '').trim().includes({n:?})"),
                None => String::new(),
            };
            format!(
                r"(() => {{
                    const role = {role:?};
                    document.querySelectorAll('[role], a, button, input, select, textarea, h1, h2, h3').forEach(el => {{
                        const implicit = el.getAttribute('role') || el.tagName.toLowerCase();
                        if (implicit === role {name_check} && ({guard})) {{
                            el.setAttribute({attr:?}, {tag:?});
                        }}
                    }});
                }})();"
            )
        }
        TargetKind::Label { text } => format!(
            r"(() => {{
                const labels = Array.from(document.querySelectorAll('label'));
                labels.forEach(label => {{
                    if ((label.textContent || '').trim().includes({text:?})) {{
                        const el = label.control || document.getElementById(label.getAttribute('for'));
                        if (el && ({guard})) el.setAttribute({attr:?}, {tag:?});
                    }}
                }});
            }})();"
        ),
        TargetKind::Text { text, exact } => {
            let cmp = if *exact {
                format!("(el.textContent || '').trim() === {text:?}")
            } else {
                format!("(el.textContent || '').trim().includes({text:?})")
            };
            format!(
                r"document.querySelectorAll('body *').forEach(el => {{
                    if ({cmp} && el.children.length === 0 && ({guard})) {{
                        el.setAttribute({attr:?}, {tag:?});
                    }}
                }});"
            )
        }
    }
}

/// Recursively build the statements tagging `target` with `attr="tag"`,
/// folding any `within` scope into the guard expression via `Element.closest`
/// on a scope attribute tagged by a nested call. `target.near` is not handled
/// here; the caller applies it once as a post-pass over the final matches.
fn build_match_statements(target: &Target, attr: &str, tag: &str) -> String {
    match &target.within {
        Some(scope) => {
            let scope_tag = next_tag();
            let scope_stmts = build_match_statements(scope, "data-showrun-scope", &scope_tag);
            let guard = format!(r#"el.closest('[data-showrun-scope="{scope_tag}"]') !== null"#);
            format!("{scope_stmts}\n{}", kind_statements(&target.kind, attr, tag, &guard))
        }
        None => kind_statements(&target.kind, attr, tag, "true"),
    }
}

/// JS computing, for every element tagged `match_attr=match_tag`, the DOM-node
/// distance to the nearest element tagged `near_attr=near_tag`, recorded back
/// onto the match element as `data-showrun-dist`.
fn distance_statements(match_tag: &str, near_tag: &str) -> String {
    format!(
        r#"(() => {{
            function ancestors(n) {{ const a = []; while (n) {{ a.push(n); n = n.parentNode; }} return a; }}
            function distance(a, b) {{
                const chainA = ancestors(a);
                let n = b, steps = 0;
                while (n && !chainA.includes(n)) {{ n = n.parentNode; steps += 1; }}
                if (!n) return Infinity;
                return chainA.indexOf(n) + steps;
            }}
            const nears = Array.from(document.querySelectorAll('[data-showrun-near="{near_tag}"]'));
            document.querySelectorAll('[data-showrun-match="{match_tag}"]').forEach(el => {{
                let best = Infinity;
                nears.forEach(n => {{ const d = distance(el, n); if (d < best) best = d; }});
                el.setAttribute('data-showrun-dist', String(best));
            }});
        }})();"#
    )
}

/// Resolve `target` against `page`, returning every matching element.
/// `within` restricts matches to real descendants of the scope target via
/// `Element.closest`; `near`, when present, additionally sorts the result by
/// ascending DOM-node distance to the nearest element matched by the near
/// target (closest first).
pub async fn resolve_elements(page: &Page, target: &Target) -> Result<Vec<Element>> {
    let tag = next_tag();
    let mut script = build_match_statements(target, "data-showrun-match", &tag);

    let near_tag = if let Some(near) = &target.near {
        let near_tag = next_tag();
        script.push('\n');
        script.push_str(&build_match_statements(near, "data-showrun-near", &near_tag));
        script.push('\n');
        script.push_str(&distance_statements(&tag, &near_tag));
        Some(near_tag)
    } else {
        None
    };

    let full_script = format!("(() => {{\n{script}\nreturn true;\n}})()");
    page.evaluate(full_script.as_str())
        .await
        .map_err(|e| ShowRunError::InternalError(format!("target match script failed: {e}")))?;

    let selector = format!("[data-showrun-match=\"{tag}\"]");
    let elements = page
        .find_elements(selector.as_str())
        .await
        .map_err(|e| ShowRunError::TargetNotFound(format!("{:?}: {e}", target.kind)))?;

    if near_tag.is_none() {
        return Ok(elements);
    }

    let mut with_distance = Vec::with_capacity(elements.len());
    for el in elements {
        let dist = el
            .attribute("data-showrun-dist")
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(f64::INFINITY);
        with_distance.push((dist, el));
    }
    with_distance.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(with_distance.into_iter().map(|(_, el)| el).collect())
}

/// Resolve to exactly one element, honoring `first` semantics: with
/// `first=true` the earliest match is used; otherwise more than one match is
/// ambiguous.
pub async fn resolve_one(page: &Page, target: &Target, first: bool) -> Result<Element> {
    let mut elements = resolve_elements(page, target).await?;
    if elements.is_empty() {
        return Err(ShowRunError::TargetNotFound(format!("{:?}", target.kind)));
    }
    if elements.len() > 1 && !first {
        return Err(ShowRunError::AmbiguousTarget(format!("{:?}", target.kind), elements.len()));
    }
    Ok(elements.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_match_statements_without_within_guards_on_true() {
        let target = Target::css("#submit");
        let stmts = build_match_statements(&target, "data-showrun-match", "t1");
        assert!(stmts.contains("if (true)"));
        assert!(stmts.contains(r#"data-showrun-match"#));
    }

    #[test]
    fn build_match_statements_with_within_adds_closest_guard() {
        let mut target = Target::css("button");
        target.within = Some(Box::new(Target::css("#form")));
        let stmts = build_match_statements(&target, "data-showrun-match", "t2");
        assert!(stmts.contains("data-showrun-scope"));
        assert!(stmts.contains(".closest("));
    }

    #[test]
    fn distance_statements_reference_both_tags() {
        let stmts = distance_statements("m1", "n1");
        assert!(stmts.contains(r#"data-showrun-match="m1""#));
        assert!(stmts.contains(r#"data-showrun-near="n1""#));
    }
}
