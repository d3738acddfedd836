use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::git::git_lowlevel::run;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key '{0}'")]
    MissingConfig(String),

    #[error("config key '{0}' has multiple values and no single-value default")]
    AmbiguousConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Distinguishes accessor kinds so the memoization cache never returns a
/// value parsed under the wrong type for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AccessorKind {
    Str,
    Path,
    Int,
    Bool,
}

fn normalize_key(key: &str) -> String {
    let key = key.strip_prefix('.').unwrap_or(key);
    if key.contains('.') {
        key.to_string()
    } else {
        format!("deploy.{key}")
    }
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Runs `git config [<scope-args>...] --get <key>` and classifies the exit
/// code: 0 -> present, 1 -> missing, 2 -> multiple values.
fn git_config_get(scope_args: &[&str], key: &str) -> Result<Option<String>, ConfigError> {
    let mut args: Vec<&str> = vec!["config"];
    args.extend_from_slice(scope_args);
    args.push("--get");
    args.push(key);

    let (output, code) = run(&args, &None).map_err(|e| ConfigError::Other(e.into()))?;
    match code {
        0 => Ok(Some(output.stdout.trim().to_string())),
        1 => Ok(None),
        2 => Err(ConfigError::AmbiguousConfig(key.to_string())),
        _ => Err(ConfigError::Other(anyhow!(
            "git config exited with unexpected status {code} for key '{key}'"
        ))),
    }
}

/// Typed, memoized access to configuration, sourced from an optional
/// override file (`deploy.config-file`) layered over the standard git
/// config chain. `user.*` keys bypass both and read the global config only.
#[derive(Default)]
pub struct ConfigStore {
    cache: HashMap<(String, AccessorKind), Option<String>>,
    override_file: Option<PathBuf>,
    override_file_checked: bool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn override_file(&mut self) -> Option<PathBuf> {
        if !self.override_file_checked {
            self.override_file_checked = true;
            self.override_file = git_config_get(&[], "deploy.config-file")
                .ok()
                .flatten()
                .map(|raw| expand_tilde(&raw));
        }
        self.override_file.clone()
    }

    fn resolve_raw(&mut self, key: &str) -> Result<Option<String>, ConfigError> {
        let key = normalize_key(key);

        if key.starts_with("user.") {
            return git_config_get(&["--global"], &key);
        }

        if key.starts_with("deploy.") {
            if let Some(file) = self.override_file() {
                if file.is_file() {
                    if let Some(file_str) = file.to_str() {
                        if let Some(v) = git_config_get(&["-f", file_str], &key)? {
                            return Ok(Some(v));
                        }
                    }
                }
            }
        }

        git_config_get(&[], &key)
    }

    fn get_cached(&mut self, key: &str, kind: AccessorKind) -> Result<Option<String>, ConfigError> {
        let cache_key = (key.to_string(), kind);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit.clone());
        }
        let value = self.resolve_raw(key)?;
        self.cache.insert(cache_key, value.clone());
        Ok(value)
    }

    /// Raw string accessor. Fails with `MissingConfig` if absent.
    pub fn get_string(&mut self, key: &str) -> Result<String, ConfigError> {
        self.get_cached(key, AccessorKind::Str)?
            .ok_or_else(|| ConfigError::MissingConfig(key.to_string()))
    }

    pub fn get_string_or(&mut self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self
            .get_cached(key, AccessorKind::Str)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn get_string_opt(&mut self, key: &str) -> Result<Option<String>, ConfigError> {
        self.get_cached(key, AccessorKind::Str)
    }

    /// Tilde-expanded path accessor.
    pub fn get_path(&mut self, key: &str) -> Result<PathBuf, ConfigError> {
        let raw = self
            .get_cached(key, AccessorKind::Path)?
            .ok_or_else(|| ConfigError::MissingConfig(key.to_string()))?;
        Ok(expand_tilde(&raw))
    }

    pub fn get_path_opt(&mut self, key: &str) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self
            .get_cached(key, AccessorKind::Path)?
            .map(|raw| expand_tilde(&raw)))
    }

    pub fn get_int(&mut self, key: &str) -> Result<i64, ConfigError> {
        let raw = self
            .get_cached(key, AccessorKind::Int)?
            .ok_or_else(|| ConfigError::MissingConfig(key.to_string()))?;
        raw.parse()
            .map_err(|_| ConfigError::Other(anyhow!("'{key}' is not a valid integer: {raw}")))
    }

    pub fn get_int_or(&mut self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get_cached(key, AccessorKind::Int)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Other(anyhow!("'{key}' is not a valid integer: {raw}"))),
            None => Ok(default),
        }
    }

    pub fn get_bool(&mut self, key: &str) -> Result<bool, ConfigError> {
        let raw = self
            .get_cached(key, AccessorKind::Bool)?
            .ok_or_else(|| ConfigError::MissingConfig(key.to_string()))?;
        parse_bool(&raw, key)
    }

    pub fn get_bool_or(&mut self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get_cached(key, AccessorKind::Bool)? {
            Some(raw) => parse_bool(&raw, key),
            None => Ok(default),
        }
    }
}

fn parse_bool(raw: &str, key: &str) -> Result<bool, ConfigError> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::Other(anyhow!(
            "'{key}' is not 'true' or 'false': {raw}"
        ))),
    }
}

/// Nested mapping produced by a `git config --list -z` dump, used only for
/// diagnostic dumps (`git deploy status --show-prefix` and similar). Leaf
/// values keep the raw string; intermediate path segments fan out into
/// nested tables on the dotted key.
#[derive(Debug, Default, Clone)]
pub enum ConfigValue {
    #[default]
    Empty,
    Leaf(String),
    Table(HashMap<String, ConfigValue>),
}

/// Bulk accessor: `git config --list -z [-f file]` parsed into a nested map.
pub fn dump_config(file: Option<&Path>) -> Result<HashMap<String, ConfigValue>> {
    let mut args = vec!["config", "--list", "-z"];
    if let Some(f) = file {
        args.push("-f");
        args.push(f.to_str().ok_or_else(|| anyhow!("non-utf8 config path"))?);
    }
    let (output, code) = run(&args, &None)?;
    if code != 0 {
        return Ok(HashMap::new());
    }

    let mut root: HashMap<String, ConfigValue> = HashMap::new();
    for entry in output.stdout.split('\0').filter(|e| !e.is_empty()) {
        let (key, value) = entry.split_once('\n').unwrap_or((entry, ""));
        insert_dotted(&mut root, key, value);
    }
    Ok(root)
}

fn insert_dotted(root: &mut HashMap<String, ConfigValue>, key: &str, value: &str) {
    let parts: Vec<&str> = key.split('.').collect();
    let mut node = root;
    for part in &parts[..parts.len().saturating_sub(1)] {
        let entry = node
            .entry((*part).to_string())
            .or_insert_with(|| ConfigValue::Table(HashMap::new()));
        if !matches!(entry, ConfigValue::Table(_)) {
            *entry = ConfigValue::Table(HashMap::new());
        }
        node = match entry {
            ConfigValue::Table(t) => t,
            _ => unreachable!(),
        };
    }
    if let Some(last) = parts.last() {
        node.insert((*last).to_string(), ConfigValue::Leaf(value.to_string()));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_key_bare() {
        assert_eq!(normalize_key("force"), "deploy.force");
    }

    #[test]
    fn test_normalize_key_dotted() {
        assert_eq!(normalize_key("deploy.force"), "deploy.force");
    }

    #[test]
    fn test_normalize_key_leading_dot() {
        assert_eq!(normalize_key(".force"), "deploy.force");
    }

    #[test]
    fn test_expand_tilde_no_home_component() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", "k").unwrap());
        assert!(!parse_bool("false", "k").unwrap());
        assert!(parse_bool("yes", "k").is_err());
    }

    #[test]
    fn test_insert_dotted_nesting() {
        let mut root = HashMap::new();
        insert_dotted(&mut root, "deploy.remote-site", "origin");
        match root.get("deploy") {
            Some(ConfigValue::Table(t)) => match t.get("remote-site") {
                Some(ConfigValue::Leaf(v)) => assert_eq!(v, "origin"),
                _ => panic!("expected leaf"),
            },
            _ => panic!("expected table"),
        }
    }
}
