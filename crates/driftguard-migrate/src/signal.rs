//! Rebalance-signal override file.
//!
//! Operators (or an external rebalancer) can drop a small JSON file under
//! the data root to force the rebalance flag independent of telemetry:
//!
//! ```json
//! {"rebalanceSignal": true}
//! ```
//!
//! The resolved path must stay inside the data root; anything else is
//! ignored. A missing or unparsable file is treated as "no override".

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalFile {
    rebalance_signal: bool,
}

/// Read the override flag, if a valid signal file exists under the root.
pub fn read_rebalance_signal(data_root: &Path, signal_path: &str) -> Option<bool> {
    let signal_path = signal_path.trim();
    if signal_path.is_empty() {
        return None;
    }

    let candidate = {
        let raw = Path::new(signal_path);
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            data_root.join(raw)
        }
    };

    // Containment check on the canonical path. A file that does not
    // exist fails canonicalization and is treated as no override.
    let root = data_root.canonicalize().ok()?;
    let resolved = candidate.canonicalize().ok()?;
    if !resolved.starts_with(&root) {
        warn!(path = %resolved.display(), "rebalance signal file outside data root, ignoring");
        return None;
    }

    let content = std::fs::read_to_string(&resolved).ok()?;
    match serde_json::from_str::<SignalFile>(&content) {
        Ok(signal) => Some(signal.rebalance_signal),
        Err(e) => {
            warn!(path = %resolved.display(), error = %e, "malformed rebalance signal file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_no_override() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_rebalance_signal(dir.path(), "signal.json"), None);
        assert_eq!(read_rebalance_signal(dir.path(), ""), None);
    }

    #[test]
    fn valid_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("signal.json"), r#"{"rebalanceSignal": true}"#).unwrap();
        assert_eq!(read_rebalance_signal(dir.path(), "signal.json"), Some(true));

        std::fs::write(dir.path().join("signal.json"), r#"{"rebalanceSignal": false}"#).unwrap();
        assert_eq!(read_rebalance_signal(dir.path(), "signal.json"), Some(false));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("signal.json"), "not json").unwrap();
        assert_eq!(read_rebalance_signal(dir.path(), "signal.json"), None);
    }

    #[test]
    fn escape_outside_root_is_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(outer.path().join("evil.json"), r#"{"rebalanceSignal": true}"#).unwrap();

        assert_eq!(read_rebalance_signal(&root, "../evil.json"), None);
        assert_eq!(
            read_rebalance_signal(&root, outer.path().join("evil.json").to_str().unwrap()),
            None
        );
    }
}
