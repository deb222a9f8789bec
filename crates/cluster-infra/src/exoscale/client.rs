//! Signed client for the Exoscale v2 REST API
//!
//! Requests carry an `EXO2-HMAC-SHA256` Authorization header computed over
//! the method, path, body and an expiry timestamp.

use super::error::ExoscaleError;
use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

/// Lifetime of a request signature
const SIGNATURE_TTL: Duration = Duration::from_secs(600);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// API endpoint of a zone
pub fn zone_endpoint(zone: &str) -> String {
    format!("https://api-{zone}.exoscale.com/v2")
}

/// Build the `Authorization` header value for one request.
///
/// `path` is the full request path including the `/v2` prefix. The signed
/// message is `"<METHOD> <path>\n<body>\n\n\n<expires>"` (no query
/// parameters and no signed headers).
pub fn authorization_header(
    api_key: &str,
    api_secret: &str,
    method: &Method,
    path: &str,
    body: &str,
    expires: i64,
) -> Result<String> {
    let message = format!("{method} {path}\n{body}\n\n\n{expires}");
    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid API secret: {e}"))?;
    mac.update(message.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    Ok(format!(
        "EXO2-HMAC-SHA256 credential={api_key},expires={expires},signature={signature}"
    ))
}

/// API key pair, the secret is never printed
#[derive(Clone)]
pub struct ExoscaleCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ExoscaleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExoscaleCredentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

/// Reference to another resource (`{"id": ...}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdRef {
    pub id: String,
}

/// An asynchronous API operation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(default)]
    pub state: String,
    /// The resource the operation acts on
    pub reference: Option<IdRef>,
}

impl Operation {
    pub fn is_pending(&self) -> bool {
        self.state == "pending"
    }

    /// ID of the referenced resource
    pub fn reference_id(&self) -> Result<&str> {
        self.reference
            .as_ref()
            .map(|r| r.id.as_str())
            .with_context(|| format!("Operation {} has no reference", self.id))
    }
}

/// Exoscale API client for one zone
#[derive(Clone)]
pub struct ExoscaleClient {
    http: reqwest::Client,
    endpoint: String,
    zone: String,
    credentials: ExoscaleCredentials,
}

impl std::fmt::Debug for ExoscaleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExoscaleClient")
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

impl ExoscaleClient {
    pub fn new(zone: &str, credentials: ExoscaleCredentials) -> Result<Self> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            bail!("EXOSCALE_API_KEY and EXOSCALE_API_SECRET must be set");
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint: zone_endpoint(zone),
            zone: zone.to_string(),
            credentials,
        })
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let body = body.map(Value::to_string).unwrap_or_default();
        let expires = chrono::Utc::now().timestamp() + SIGNATURE_TTL.as_secs() as i64;
        let authorization = authorization_header(
            &self.credentials.api_key,
            &self.credentials.api_secret,
            &method,
            &format!("/v2{path}"),
            &body,
            expires,
        )?;

        debug!(%method, path, "Exoscale API request");

        let mut request = self
            .http
            .request(method.clone(), format!("{}{path}", self.endpoint))
            .header(reqwest::header::AUTHORIZATION, authorization);
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {path} failed"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response of {method} {path}"))?;

        if !status.is_success() {
            return Err(ExoscaleError::from_status(status.as_u16(), path, &text).into());
        }

        serde_json::from_str(&text)
            .with_context(|| format!("Unexpected response body from {method} {path}"))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Operation> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Operation> {
        self.request(Method::DELETE, path, None).await
    }

    /// Poll `GET /operation/<id>` until the operation leaves `pending`.
    pub async fn wait_for_operation(&self, operation: &Operation) -> Result<Operation> {
        let path = format!("/operation/{}", operation.id);
        let done = wait_until(
            PollConfig::VOLUME,
            &path,
            || self.get::<Operation>(&path),
            |op: &Operation| !op.is_pending(),
        )
        .await?;
        if !done {
            bail!("Operation {} still pending", operation.id);
        }

        let finished: Operation = self.get(&path).await?;
        match finished.state.as_str() {
            "success" => Ok(finished),
            state => bail!("Operation {} ended in state {state}", finished.id),
        }
    }
}
