//! Run-scoped mutable state: `vars`, `collectibles`, hints, and the once-cache
//!
//! The dynamic triple is modeled as plain `serde_json::Map`s threaded through
//! the interpreter loop rather than an arena of immutable snapshots; writes
//! are checkpointed and rolled back around each dispatch attempt instead.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// The var/collectible writes produced by one successful step, recorded into
/// the once-cache when the step is `once=true`.
#[derive(Debug, Clone, Default)]
pub struct OnceRecord {
    pub vars: Map<String, Value>,
    pub collectibles: Map<String, Value>,
}

impl OnceRecord {
    fn restored_keys(&self) -> Vec<String> {
        self.vars.keys().chain(self.collectibles.keys()).cloned().collect()
    }
}

/// Once-cache keyed by step id, scoped per `(pack, session)`. Recovery-
/// triggered step retries never consume or populate this cache, only the
/// main flow loop does.
pub type OnceCache = HashMap<String, OnceRecord>;

/// Mutable state threaded through one flow execution.
pub struct RunState {
    pub inputs: Map<String, Value>,
    pub vars: Map<String, Value>,
    pub collectibles: Map<String, Value>,
    pub hints: Vec<String>,
    pub steps_executed: Vec<String>,
    pub active_tab: usize,
    once_cache: OnceCache,
}

impl RunState {
    #[must_use]
    pub fn new(inputs: Map<String, Value>, once_cache: OnceCache) -> Self {
        Self {
            inputs,
            vars: Map::new(),
            collectibles: Map::new(),
            hints: Vec::new(),
            steps_executed: Vec::new(),
            active_tab: 0,
            once_cache,
        }
    }

    /// Snapshot `vars`/`collectibles` before dispatching a step, so a failed
    /// attempt's partial writes can be rolled back before retrying.
    #[must_use]
    pub fn checkpoint(&self) -> (Map<String, Value>, Map<String, Value>) {
        (self.vars.clone(), self.collectibles.clone())
    }

    pub fn restore_checkpoint(&mut self, checkpoint: (Map<String, Value>, Map<String, Value>)) {
        self.vars = checkpoint.0;
        self.collectibles = checkpoint.1;
    }

    /// Whether `step_id` has already executed and been cached in this session.
    #[must_use]
    pub fn has_run_once(&self, step_id: &str) -> bool {
        self.once_cache.contains_key(step_id)
    }

    /// Merge a previously cached step's writes back into current state,
    /// returning the keys restored (for `step_skipped`'s `restored_keys`).
    pub fn restore_once(&mut self, step_id: &str) -> Vec<String> {
        let Some(record) = self.once_cache.get(step_id) else { return Vec::new() };
        let keys = record.restored_keys();
        for (k, v) in &record.vars {
            self.vars.insert(k.clone(), v.clone());
        }
        for (k, v) in &record.collectibles {
            self.collectibles.insert(k.clone(), v.clone());
        }
        keys
    }

    /// Apply a step's writes to `vars`/`collectibles`, and cache them under
    /// `step_id` if `once` is set.
    pub fn apply_writes(&mut self, step_id: &str, once: bool, writes: StepWrites) {
        for (k, v) in &writes.vars {
            self.vars.insert(k.clone(), v.clone());
        }
        for (k, v) in &writes.collectibles {
            self.collectibles.insert(k.clone(), v.clone());
        }
        if once {
            self.once_cache.insert(step_id.to_string(), OnceRecord { vars: writes.vars, collectibles: writes.collectibles });
        }
    }

    /// Hand back the (possibly updated) once-cache so the caller can persist
    /// it for the session's next `run()` call.
    #[must_use]
    pub fn into_once_cache(self) -> OnceCache {
        self.once_cache
    }
}

/// The var/collectible writes one step dispatch produced.
#[derive(Debug, Clone, Default)]
pub struct StepWrites {
    pub vars: Map<String, Value>,
    pub collectibles: Map<String, Value>,
}

impl StepWrites {
    #[must_use]
    pub fn var(name: impl Into<String>, value: Value) -> Self {
        let mut vars = Map::new();
        vars.insert(name.into(), value);
        Self { vars, collectibles: Map::new() }
    }

    #[must_use]
    pub fn collectible(name: impl Into<String>, value: Value) -> Self {
        let mut collectibles = Map::new();
        collectibles.insert(name.into(), value);
        Self { vars: Map::new(), collectibles }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn once_cache_restores_prior_writes() {
        let mut state = RunState::new(Map::new(), OnceCache::new());
        state.apply_writes("s1", true, StepWrites::var("x", json!(1)));
        assert!(state.has_run_once("s1"));

        state.vars.clear();
        let restored = state.restore_once("s1");
        assert_eq!(restored, vec!["x".to_string()]);
        assert_eq!(state.vars.get("x"), Some(&json!(1)));
    }

    #[test]
    fn checkpoint_round_trips_state() {
        let mut state = RunState::new(Map::new(), OnceCache::new());
        state.vars.insert("a".into(), json!(1));
        let checkpoint = state.checkpoint();
        state.vars.insert("b".into(), json!(2));
        state.restore_checkpoint(checkpoint);
        assert!(!state.vars.contains_key("b"));
    }
}
