//! Configuration errors
//!
//! Raised while reading the environment, always before any provider call.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Neither {name} nor {plural} is set in the environment")]
    MissingList { name: String, plural: String },

    #[error("Both {name} and {plural} are set. Please set only one")]
    ConflictingList { name: String, plural: String },

    #[error("{name} is set but lists no values")]
    EmptyList { name: String },

    #[error("{name} environment variable is not set")]
    MissingVar { name: String },

    #[error("Port '{value}' is not a valid integer")]
    InvalidPort { value: String },

    #[error("Port '{value}' is out of valid range (1-65535)")]
    PortOutOfRange { value: String },

    #[error("Project name '{name}' is invalid: {reason}")]
    InvalidProjectName { name: String, reason: &'static str },

    #[error("{name}='{value}' is not a valid positive integer")]
    InvalidCount { name: String, value: String },

    #[error("Admin repo '{entry}' must have the form org/repo")]
    InvalidAdminRepo { entry: String },
}
