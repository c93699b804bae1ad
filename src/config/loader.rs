// file: src/config/loader.rs
// version: 1.1.0
// guid: d4e5f6g7-h8i9-0123-4567-890123defghi

//! Environment-driven configuration loading
//!
//! Every command is configured through environment variables. The loader
//! snapshots the process environment once so that lookups are consistent
//! for the whole run, and optionally layers a YAML env file underneath it.

use crate::error::ImageSyncError;
use crate::Result;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader with environment variable substitution
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a new config loader from the process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Create a loader that sees no environment at all
    pub fn empty() -> Self {
        Self {
            env_vars: HashMap::new(),
        }
    }

    /// Layer a YAML env file (a flat `NAME: value` map) under the environment.
    ///
    /// String values may reference `${VAR}`; references are expanded after
    /// parsing, so comments and YAML syntax never see substituted text.
    /// Variables already set in the real environment win over the file.
    pub fn load_env_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let content = fs::read_to_string(&path).map_err(|e| {
            ImageSyncError::ConfigError(format!(
                "Failed to read env file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)?;

        let mut missing_vars = Vec::new();
        let mut parsed = Vec::new();
        for (key, value) in values {
            let value = match value {
                serde_yaml::Value::String(s) => self.expand_into(&s, &mut missing_vars)?,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Null => continue,
                other => {
                    return Err(ImageSyncError::config(format!(
                        "env file value for {} must be a scalar, got {:?}",
                        key, other
                    )))
                }
            };
            parsed.push((key, value));
        }
        missing_error(missing_vars)?;

        for (key, value) in parsed {
            self.env_vars.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// Expand `${VAR}` in one value; unknown names are pushed to `missing`
    fn expand_into(&self, content: &str, missing: &mut Vec<String>) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")?;
        Ok(re
            .replace_all(content, |cap: &regex::Captures<'_>| {
                match self.env_vars.get(&cap[1]) {
                    Some(value) => value.clone(),
                    None => {
                        missing.push(cap[1].to_string());
                        cap[0].to_string()
                    }
                }
            })
            .into_owned())
    }

    /// Set environment variable for lookups
    pub fn set_env_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }

    /// Value of a variable; empty or whitespace-only values count as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env_vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First set variable among `keys`
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Value of a variable or a default
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Required value; records a hint in `missing` when unset
    pub fn require(&self, key: &str, hint: &str, missing: &mut Vec<String>) -> String {
        match self.get(key) {
            Some(value) => value.to_string(),
            None => {
                missing.push(format!("please set env {} {}", key, hint));
                String::new()
            }
        }
    }

    /// Boolean toggle; accepts true/false, yes/no, on/off and 1/0
    pub fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => parse_flag(value).ok_or_else(|| {
                ImageSyncError::config(format!(
                    "{} must be true or false, got '{}'",
                    key, value
                ))
            }),
        }
    }

    /// Comma-separated list with surrounding whitespace and empty items removed
    pub fn list(&self, key: &str, default: &str) -> Vec<String> {
        split_list(self.get(key).unwrap_or(default))
    }

    /// Numeric value or a default
    pub fn number<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse::<T>().map_err(|e| {
                ImageSyncError::config(format!("{} must be a number, got '{}': {}", key, value, e))
            }),
        }
    }

    /// Filesystem path with `~` and `$VAR` expanded
    pub fn path(&self, key: &str) -> Result<Option<PathBuf>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        let expanded = shellexpand::full_with_context(
            raw,
            || std::env::var("HOME").ok(),
            |name| -> std::result::Result<Option<String>, std::env::VarError> {
                Ok(self.env_vars.get(name).cloned())
            },
        )
        .map_err(|e| ImageSyncError::config(format!("cannot expand {}: {}", key, e)))?;
        Ok(Some(PathBuf::from(expanded.as_ref())))
    }

    /// Path with a default when unset
    pub fn path_or(&self, key: &str, default: &str) -> Result<PathBuf> {
        Ok(self.path(key)?.unwrap_or_else(|| PathBuf::from(default)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a boolean toggle value
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated list
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn collected missing-variable hints into one configuration error
pub fn check_missing(missing: Vec<String>) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImageSyncError::ConfigError(missing.join("\n")))
    }
}

fn missing_error(missing_vars: Vec<String>) -> Result<()> {
    if missing_vars.is_empty() {
        return Ok(());
    }
    Err(ImageSyncError::ConfigError(format!(
        "Missing environment variables: {}",
        missing_vars.join(", ")
    )))
}
