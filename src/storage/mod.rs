//! Persistence layer.
//!
//! Saves and loads per-account state to/from a JSON file, and appends
//! prediction audit records to a per-account decisions log. Persistence
//! is fire-and-forget after each observable mutation: at-least-once, not
//! transactional. Settlement idempotency is the defense against replay
//! after a crash, so a torn state file degrades to a fresh start rather
//! than an error.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::predictor::AuditRecord;
use crate::state::AccountState;

/// Save account state to a JSON file.
pub fn save_state(state: &AccountState, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state dir {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(state).context("Failed to serialise account state")?;
    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write state to {}", path.display()))?;

    debug!(path = %path.display(), fund = state.counters.fund, "State saved");
    Ok(())
}

/// Load account state from a JSON file.
///
/// Returns `None` for a missing file (fresh start). A file that exists
/// but does not parse — e.g. a torn write from a crash — is also treated
/// as a fresh start, with a warning.
pub fn load_state(path: &Path) -> Result<Option<AccountState>> {
    if !path.exists() {
        info!(path = %path.display(), "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state from {}", path.display()))?;

    match serde_json::from_str::<AccountState>(&json) {
        Ok(state) => {
            info!(
                path = %path.display(),
                fund = state.counters.fund,
                wagers = state.counters.total_placed,
                history = state.history.len(),
                "State loaded from disk"
            );
            Ok(Some(state))
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "State file unreadable, starting fresh"
            );
            Ok(None)
        }
    }
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete state file {}", path.display()))?;
    }
    Ok(())
}

/// Append one prediction audit record to the decisions log, one JSON
/// object per line. Best-effort: callers log the error and move on.
pub fn append_decision(path: &Path, record: &AuditRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log dir {}", parent.display()))?;
        }
    }

    let line = serde_json::to_string(record).context("Failed to serialise audit record")?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open decisions log {}", path.display()))?;
    writeln!(file, "{line}")
        .with_context(|| format!("Failed to append to decisions log {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StakePreset;
    use chrono::Utc;
    use std::path::PathBuf;

    fn temp_path(suffix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("punter_test_{}_{suffix}", uuid::Uuid::new_v4()));
        p
    }

    fn sample_state() -> AccountState {
        AccountState::new(1_500_000, StakePreset::default(), "test-model".into())
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("state.json");
        let state = sample_state();
        save_state(&state, &path).unwrap();

        let loaded = load_state(&path).unwrap().unwrap();
        assert_eq!(loaded.counters.fund, 1_500_000);
        assert_eq!(loaded.counters.model_id, "test-model");

        delete_state(&path).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let loaded = load_state(Path::new("/tmp/punter_nonexistent_state_12345.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_preserves_fields() {
        let path = temp_path("state.json");
        let mut state = sample_state();
        state.counters.total_placed = 12;
        state.counters.total_wins = 7;
        state.counters.earnings = 42_000;
        state.counters.loss_count = 2;
        state.push_outcome(1);
        state.push_outcome(0);

        save_state(&state, &path).unwrap();
        let loaded = load_state(&path).unwrap().unwrap();

        assert_eq!(loaded.counters.total_placed, 12);
        assert_eq!(loaded.counters.total_wins, 7);
        assert_eq!(loaded.counters.earnings, 42_000);
        assert_eq!(loaded.counters.loss_count, 2);
        assert_eq!(loaded.history, vec![1, 0]);

        delete_state(&path).unwrap();
    }

    #[test]
    fn test_torn_state_file_starts_fresh() {
        let path = temp_path("state.json");
        std::fs::write(&path, "{\"history\": [1, 0").unwrap();
        let loaded = load_state(&path).unwrap();
        assert!(loaded.is_none());
        delete_state(&path).unwrap();
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let mut path = temp_path("nested");
        path.push("deeper");
        path.push("state.json");
        save_state(&sample_state(), &path).unwrap();
        assert!(path.exists());
        delete_state(&path).unwrap();
    }

    #[test]
    fn test_delete_nonexistent_ok() {
        assert!(delete_state(Path::new("/tmp/punter_does_not_exist_xyz.json")).is_ok());
    }

    #[test]
    fn test_append_decision_is_jsonl() {
        let path = temp_path("decisions.log");
        let record = AuditRecord {
            timestamp: Utc::now(),
            sequence: 1,
            model_id: "m".into(),
            input: serde_json::json!({"short_term_20": "101"}),
            output: serde_json::json!({"direction": "Big"}),
        };
        append_decision(&path, &record).unwrap();
        append_decision(&path, &record).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["model_id"], "m");
        }
        delete_state(&path).unwrap();
    }
}
