//! Sensor configuration (§6): a pre-parsed tree the core is handed, not a
//! generic config node. Loaded from TOML rather than the edge binary's JSON
//! since the rule/classification paths and log directory are a flat record,
//! not a nested device config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Rule files to load, in order. Later files' signatures are appended,
    /// not merged by sid.
    pub rule_files: Vec<PathBuf>,
    /// Optional `classtype,short_desc,priority` mapping file.
    pub classification_file: Option<PathBuf>,
    /// Directory `fast.log` is opened under.
    pub log_dir: PathBuf,
    /// Promote the first malformed rule into a load-abort instead of
    /// skip-and-count (§7).
    #[serde(default)]
    pub failure_fatal: bool,
    /// Worker thread count; `None` sizes the pool from `cpu_count()`.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            rule_files: vec![PathBuf::from("rules/local.rules")],
            classification_file: Some(PathBuf::from("rules/classification.config")),
            log_dir: PathBuf::from("/var/log/aegis"),
            failure_fatal: false,
            worker_threads: None,
        }
    }
}

impl SensorConfig {
    /// Load from a TOML file, falling back to the compiled-in default when
    /// `path` doesn't exist yet.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn fast_log_path(&self) -> PathBuf {
        self.log_dir.join(aegis_alert::FASTLOG_DEFAULT_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = SensorConfig::load(std::path::Path::new("/nonexistent/aegis.toml")).unwrap();
        assert_eq!(cfg.log_dir, PathBuf::from("/var/log/aegis"));
    }

    #[test]
    fn toml_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.toml");
        std::fs::write(
            &path,
            r#"
            rule_files = ["rules/a.rules", "rules/b.rules"]
            classification_file = "rules/classification.config"
            log_dir = "/tmp/aegis-log"
            failure_fatal = true
            worker_threads = 4
            "#,
        )
        .unwrap();

        let cfg = SensorConfig::load(&path).unwrap();
        assert_eq!(cfg.rule_files.len(), 2);
        assert!(cfg.failure_fatal);
        assert_eq!(cfg.worker_threads, Some(4));
        assert_eq!(cfg.fast_log_path(), PathBuf::from("/tmp/aegis-log/fast.log"));
    }
}
