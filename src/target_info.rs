/// File containing all the information regarding the files exchanged with the program under test

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "CREST_CONFIG";
pub const INPUT_ENV: &str = "CREST_INPUT";
pub const TRACE_ENV: &str = "CREST_TRACE";
pub const LOG_ENV: &str = "CREST_LOG";
pub const SOLVER_TIMEOUT_ENV: &str = "CREST_SOLVER_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetInfo {
    // Input values of the run, one integer per symbolic input
    pub input_path: PathBuf,
    // Execution trace written when the run ends
    pub trace_path: PathBuf,
    // Log file; `None` logs to the terminal only
    pub log_path: Option<PathBuf>,
    pub log_level: String,
    pub solver_timeout_ms: Option<u64>,
}

impl Default for TargetInfo {
    fn default() -> Self {
        TargetInfo {
            input_path: PathBuf::from("input"),
            trace_path: PathBuf::from("szd_execution"),
            log_path: Some(PathBuf::from("crest.log")),
            log_level: "info".to_string(),
            solver_timeout_ms: None,
        }
    }
}

impl TargetInfo {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid configuration {}", path.display()))
    }

    /// Defaults, then the JSON file named by `CREST_CONFIG`, then the individual overrides.
    pub fn from_env() -> Result<Self> {
        let mut info = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        info.apply_overrides(|key| env::var(key).ok())?;
        Ok(info)
    }

    // Apply overrides from a key lookup, so tests need not touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(INPUT_ENV) {
            self.input_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(TRACE_ENV) {
            self.trace_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(LOG_ENV) {
            self.log_path = if path.is_empty() { None } else { Some(PathBuf::from(path)) };
        }
        if let Some(ms) = lookup(SOLVER_TIMEOUT_ENV) {
            let ms = ms
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of milliseconds, got '{}'", SOLVER_TIMEOUT_ENV, ms))?;
            self.solver_timeout_ms = Some(ms);
        }
        Ok(())
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_replace_defaults() {
        let vars: HashMap<&str, &str> = [(INPUT_ENV, "in.txt"), (SOLVER_TIMEOUT_ENV, "250"), (LOG_ENV, "")]
            .into_iter()
            .collect();
        let mut info = TargetInfo::default();
        info.apply_overrides(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(info.input_path, PathBuf::from("in.txt"));
        assert_eq!(info.trace_path, PathBuf::from("szd_execution"));
        assert_eq!(info.log_path, None);
        assert_eq!(info.solver_timeout_ms, Some(250));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let info: TargetInfo = serde_json::from_str(r#"{ "trace_path": "out.trace", "log_level": "debug" }"#).unwrap();
        assert_eq!(info.trace_path, PathBuf::from("out.trace"));
        assert_eq!(info.input_path, PathBuf::from("input"));
        assert_eq!(info.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let mut info = TargetInfo::default();
        assert!(info.apply_overrides(|key| (key == SOLVER_TIMEOUT_ENV).then(|| "soon".to_string())).is_err());
    }
}
