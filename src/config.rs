use crate::t_args;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::value::Value;

pub const DEFAULT_CONFIG_FILE: &str = "action-test.yaml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CallerCfg {
    #[serde(alias = "Command")]
    pub command: Option<String>,
    #[serde(default, alias = "Args")]
    pub args: Vec<String>,
    #[serde(alias = "Timeout", alias = "timeout")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

// Accept PascalCase keys as well
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawConfig {
    #[serde(alias = "Service")]
    pub service: Option<String>,
    #[serde(alias = "Caller")]
    pub caller: Option<CallerCfg>,
    #[serde(alias = "Constants")]
    pub constants: Option<Value>,
    #[serde(alias = "Fixtures")]
    pub fixtures: Option<OneOrMany>,
}

/// Resolved run configuration. Paths are absolute or relative to the working directory.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub service: Option<String>,
    pub caller: CallerCfg,
    pub constants: Value,
    pub fixtures: Vec<PathBuf>,
}

fn resolve_relative_to(path: &str, config_file: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match config_file.parent() {
        Some(dir) => dir.join(p),
        None => p.to_path_buf(),
    }
}

/// A bare program name is looked up on `PATH`; anything with a separator is a path.
fn resolve_command(command: &str, config_file: &Path) -> String {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        resolve_relative_to(command, config_file).to_string_lossy().into_owned()
    } else {
        command.to_string()
    }
}

impl RunnerConfig {
    pub fn load(file: &Path) -> Result<Self> {
        let content = fs::read_to_string(file)
            .with_context(|| t_args!("config-failed-to-read", "file" => file.display()))?;
        let raw: RawConfig = serde_yaml::from_str(&content)
            .with_context(|| t_args!("config-yaml-error", "file" => file.display()))?;
        Ok(Self::from_raw(raw, file))
    }

    /// Load `file` if given, else `action-test.yaml` in the working directory if it exists.
    pub fn discover(file: Option<&Path>) -> Result<Self> {
        match file {
            Some(f) => Self::load(f),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_raw(raw: RawConfig, file: &Path) -> Self {
        let mut caller = raw.caller.unwrap_or_default();
        caller.command = caller.command.map(|c| resolve_command(c.trim(), file));
        RunnerConfig {
            service: raw.service.map(|s| s.trim().to_string()),
            caller,
            constants: raw.constants.unwrap_or_else(Value::map),
            fixtures: raw
                .fixtures
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .iter()
                .map(|f| resolve_relative_to(f.trim(), file))
                .collect(),
        }
    }

    /// Merge a YAML or JSON map of constants over the configured ones.
    pub fn merge_constants_file(&mut self, file: &Path) -> Result<()> {
        let content = fs::read_to_string(file)
            .with_context(|| t_args!("config-failed-to-read", "file" => file.display()))?;
        let extra: Value = serde_yaml::from_str(&content)
            .with_context(|| t_args!("config-yaml-error", "file" => file.display()))?;
        self.constants.deep_merge(extra);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_the_config_file() {
        let raw: RawConfig = serde_yaml::from_str(
            "Service: users\ncaller:\n  command: ./bin/call\n  timeout_secs: 5\nfixtures: tests/fixtures\n",
        )
        .unwrap();
        let cfg = RunnerConfig::from_raw(raw, Path::new("/srv/app/action-test.yaml"));
        assert_eq!(cfg.service.as_deref(), Some("users"));
        assert_eq!(cfg.caller.command.as_deref(), Some("/srv/app/./bin/call"));
        assert_eq!(cfg.caller.timeout_secs, Some(5));
        assert_eq!(cfg.fixtures, vec![PathBuf::from("/srv/app/tests/fixtures")]);
    }

    #[test]
    fn bare_commands_stay_on_path() {
        assert_eq!(resolve_command("python3", Path::new("/srv/a.yaml")), "python3");
    }
}
