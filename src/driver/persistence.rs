//! Persistence-mode temp/profile directory resolution
//!
//! Built on [`crate::browser_profile`]'s RAII `BrowserProfile`: `none`
//! gets a fresh UUID-named directory cleaned up on drop; `session` reuses a
//! directory keyed by session id and enforces the inactivity TTL;
//! `profile` persists inside the pack directory and is never auto-deleted.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::browser_profile::{create_unique_profile_with_prefix, BrowserProfile};
use crate::error::Result;
use crate::pack::manifest::Persistence;
use crate::utils::constants::SESSION_PROFILE_TTL_SECS;

/// The resolved directory a browser session should use, plus whether it
/// should be deleted when the session ends.
pub enum ActiveProfile {
    /// Owns a [`BrowserProfile`] that cleans itself up on drop.
    Ephemeral(BrowserProfile),
    /// Reused across runs; caller must not delete it.
    Persistent(PathBuf),
}

impl ActiveProfile {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Ephemeral(profile) => profile.path(),
            Self::Persistent(path) => path.as_path(),
        }
    }
}

/// Resolve the directory to launch a browser against for the given
/// persistence mode.
pub fn resolve(
    persistence: &Persistence,
    pack_dir: &Path,
    session_id: Option<&str>,
) -> Result<ActiveProfile> {
    match persistence {
        Persistence::None => {
            let profile = create_unique_profile_with_prefix("showrun_none")
                .map_err(|e| crate::error::ShowRunError::internal(e.to_string(), &[]))?;
            Ok(ActiveProfile::Ephemeral(profile))
        }
        Persistence::Session => {
            let key = session_id.unwrap_or("default");
            let dir = std::env::temp_dir().join(format!("showrun_session_{key}"));
            reclaim_if_stale(&dir)?;
            std::fs::create_dir_all(&dir)
                .map_err(|e| crate::error::ShowRunError::internal(e.to_string(), &[]))?;
            touch(&dir)?;
            Ok(ActiveProfile::Persistent(dir))
        }
        Persistence::Profile { name } => {
            let dir = pack_dir.join("profiles").join(name);
            std::fs::create_dir_all(&dir)
                .map_err(|e| crate::error::ShowRunError::internal(e.to_string(), &[]))?;
            Ok(ActiveProfile::Persistent(dir))
        }
    }
}

/// Session-mode directories carry a marker file stamped with last-use time;
/// if stale past [`SESSION_PROFILE_TTL_SECS`], the directory is wiped before
/// reuse so cookies/storage don't survive past the inactivity window.
fn reclaim_if_stale(dir: &Path) -> Result<()> {
    let marker = dir.join(".showrun_last_used");
    if !marker.exists() {
        return Ok(());
    }
    let Ok(metadata) = std::fs::metadata(&marker) else { return Ok(()) };
    let Ok(modified) = metadata.modified() else { return Ok(()) };
    let elapsed = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if elapsed > Duration::from_secs(SESSION_PROFILE_TTL_SECS) {
        let _ = std::fs::remove_dir_all(dir);
    }
    Ok(())
}

fn touch(dir: &Path) -> Result<()> {
    std::fs::write(dir.join(".showrun_last_used"), [])
        .map_err(|e| crate::error::ShowRunError::internal(e.to_string(), &[]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_creates_ephemeral_directory() {
        let profile = resolve(&Persistence::None, Path::new("/tmp"), None).unwrap();
        assert!(profile.path().exists());
    }

    #[test]
    fn session_mode_reuses_directory_for_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = resolve(&Persistence::Session, dir.path(), Some("abc")).unwrap();
        let b = resolve(&Persistence::Session, dir.path(), Some("abc")).unwrap();
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn profile_mode_lives_under_pack_directory() {
        let dir = tempfile::tempdir().unwrap();
        let profile = resolve(
            &Persistence::Profile { name: "acct1".into() },
            dir.path(),
            None,
        )
        .unwrap();
        assert!(profile.path().starts_with(dir.path()));
    }
}
