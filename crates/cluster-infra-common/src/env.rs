//! Environment variable parsing
//!
//! List-valued settings come either from `NAME` or from `NAMES` (never both).
//! Values are split on `,` or `;`. Empty variables count as unset.
//!
//! Each reader has a pure counterpart taking the raw values so the
//! validation rules can be tested without touching the process environment.

use crate::error::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static PROJECT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_\-@+/.]*$").expect("valid project name regex"));

/// A GitHub repository granted cluster admin access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminRepo {
    pub org: String,
    pub repo: String,
}

/// Read an environment variable, treating an empty value as unset.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read a required environment variable.
pub fn require(name: &str) -> Result<String, ConfigError> {
    var(name).ok_or_else(|| ConfigError::MissingVar {
        name: name.to_string(),
    })
}

/// Split a list value on `,` or `;`, trimming whitespace and dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve a list setting from its singular and plural variables.
pub fn resolve_list(
    name: &str,
    single: Option<&str>,
    multi: Option<&str>,
) -> Result<Vec<String>, ConfigError> {
    let plural = format!("{name}S");
    match (single, multi) {
        (None, None) => Err(ConfigError::MissingList {
            name: name.to_string(),
            plural,
        }),
        (Some(_), Some(_)) => Err(ConfigError::ConflictingList {
            name: name.to_string(),
            plural,
        }),
        (Some(raw), None) => non_empty(name, split_list(raw)),
        (None, Some(raw)) => non_empty(&plural, split_list(raw)),
    }
}

fn non_empty(name: &str, values: Vec<String>) -> Result<Vec<String>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptyList {
            name: name.to_string(),
        });
    }
    Ok(values)
}

/// Read a list setting from `name` or `name + "S"`.
pub fn env_list(name: &str) -> Result<Vec<String>, ConfigError> {
    let single = var(name);
    let multi = var(&format!("{name}S"));
    resolve_list(name, single.as_deref(), multi.as_deref())
}

/// Validate port strings: digits only, within 1-65535.
pub fn parse_ports(values: &[String]) -> Result<Vec<u16>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptyList {
            name: "PORT".to_string(),
        });
    }
    values
        .iter()
        .map(|value| {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::InvalidPort {
                    value: value.clone(),
                });
            }
            match value.parse::<u16>() {
                Ok(port) if port >= 1 => Ok(port),
                _ => Err(ConfigError::PortOutOfRange {
                    value: value.clone(),
                }),
            }
        })
        .collect()
}

/// Allowed ports from `PORT` or `PORTS`.
pub fn get_ports() -> Result<Vec<u16>, ConfigError> {
    parse_ports(&env_list("PORT")?)
}

/// Validate project names: lowercase, no spaces, `^[a-z][a-z0-9_\-@+/.]*$`.
pub fn validate_project_names(names: Vec<String>) -> Result<Vec<String>, ConfigError> {
    for name in &names {
        let reason = if name.contains(' ') {
            Some("contains spaces")
        } else if name.chars().any(|c| c.is_uppercase()) {
            Some("contains uppercase letters")
        } else if !PROJECT_NAME_PATTERN.is_match(name) {
            Some("must start with a letter and only contain a-z, 0-9, _-@+/.")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ConfigError::InvalidProjectName {
                name: name.clone(),
                reason,
            });
        }
    }
    Ok(names)
}

/// Project names from `PROJECT_NAME` or `PROJECT_NAMES`.
pub fn get_project_names() -> Result<Vec<String>, ConfigError> {
    validate_project_names(env_list("PROJECT_NAME")?)
}

/// Parse a non-negative count. An unset value is 0.
pub fn parse_count(name: &str, value: Option<&str>) -> Result<u32, ConfigError> {
    let Some(value) = value else {
        return Ok(0);
    };
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidCount {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Read a node count such as `DEFAULT_NODE_COUNT` or `GPU_NODE_COUNT`.
pub fn get_env_count(name: &str) -> Result<u32, ConfigError> {
    parse_count(name, var(name).as_deref())
}

/// Parse `org/repo` pairs separated by commas.
pub fn parse_admin_repos(raw: &str) -> Result<Vec<AdminRepo>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::InvalidAdminRepo {
                entry: entry.to_string(),
            };
            let (org, repo) = entry.split_once('/').ok_or_else(invalid)?;
            if org.is_empty() || repo.is_empty() || repo.contains('/') {
                return Err(invalid());
            }
            Ok(AdminRepo {
                org: org.to_string(),
                repo: repo.to_string(),
            })
        })
        .collect()
}

/// Admin repositories from `ADMIN_REPOS`. Unset means none.
pub fn get_admin_repos() -> Result<Vec<AdminRepo>, ConfigError> {
    match var("ADMIN_REPOS") {
        Some(raw) => parse_admin_repos(&raw),
        None => Ok(Vec::new()),
    }
}
