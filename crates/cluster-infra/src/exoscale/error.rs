//! Exoscale API error classification

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExoscaleError {
    /// 404, treated as already deleted during teardown
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// 409, the resource is busy or in a conflicting state
    #[error("Conflict on {path}: {message}")]
    Conflict { path: String, message: String },

    #[error("Exoscale API error {status} on {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },
}

impl ExoscaleError {
    /// Classify a non-success response by HTTP status.
    pub fn from_status(status: u16, path: &str, body: &str) -> Self {
        let path = path.to_string();
        let message = api_message(body);
        match status {
            404 => ExoscaleError::NotFound { path },
            409 => ExoscaleError::Conflict { path, message },
            _ => ExoscaleError::Api {
                status,
                path,
                message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExoscaleError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ExoscaleError::Conflict { .. })
    }
}

/// The `message` field of an API error body, or the raw body
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Map a not-found API error to `Ok(None)`, propagating everything else.
pub fn ignore_not_found<T>(result: anyhow::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e)
            if e.downcast_ref::<ExoscaleError>()
                .is_some_and(ExoscaleError::is_not_found) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
