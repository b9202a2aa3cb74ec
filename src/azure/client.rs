use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::retry::{with_retry, IsRetryable, RetryConfig};
use crate::cli::auth::Credentials;

const ARM_BASE: &str = "https://management.azure.com";
const AAD_BASE: &str = "https://login.microsoftonline.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Default wait between long-running-operation polls when ARM sends no Retry-After
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound on polls per operation (1h at the default interval)
const MAX_POLLS: u32 = 360;

/// Azure Resource Manager API client
pub struct ArmClient {
    http: Client,
    credentials: Credentials,
    token: Mutex<AccessToken>,
    subscription_id: String,
    retry: RetryConfig,
}

/// AAD bearer token with its expiry
pub struct AccessToken {
    secret: String,
    expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: String, expires_in_secs: i64) -> Self {
        // Refresh margin so a token is not presented right at its deadline
        let margin = 120;
        Self {
            secret,
            expires_on: Utc::now() + chrono::Duration::seconds(expires_in_secs - margin),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// Errors returned by the ARM API or its long-running operations
#[derive(Debug)]
pub enum ArmError {
    Api {
        status: u16,
        code: String,
        message: String,
    },
    Network(String),
    Operation {
        status: String,
        message: String,
    },
    Decode(String),
}

impl std::fmt::Display for ArmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArmError::Api {
                status,
                code,
                message,
            } => write!(f, "HTTP {} ({}): {}", status, code, message),
            ArmError::Network(msg) => write!(f, "network error: {}", msg),
            ArmError::Operation { status, message } => {
                write!(f, "operation {}: {}", status, message)
            }
            ArmError::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for ArmError {}

impl IsRetryable for ArmError {
    fn is_retryable(&self) -> bool {
        match self {
            ArmError::Api { status, .. } => *status == 429 || matches!(status, 500..=599),
            ArmError::Network(_) => true,
            ArmError::Operation { .. } => false,
            ArmError::Decode(_) => false,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// One decoded ARM response, with the headers the LRO protocol cares about
struct ArmResponse {
    status: StatusCode,
    poll_url: Option<String>,
    retry_after: Option<Duration>,
    body: Value,
}

/// Terminal / non-terminal state of an Azure-AsyncOperation status document
#[derive(Debug, PartialEq)]
pub(crate) enum OperationState {
    InProgress,
    Succeeded,
    Failed(String),
}

/// Classify an operation-status body. Returns None when the body carries no
/// `status` field (a Location-style poll whose final body is the resource).
pub(crate) fn operation_state(body: &Value) -> Option<OperationState> {
    let status = body.get("status")?.as_str()?;
    Some(match status {
        "Succeeded" => OperationState::Succeeded,
        "Failed" | "Canceled" => {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no error detail")
                .to_string();
            OperationState::Failed(message)
        }
        _ => OperationState::InProgress,
    })
}

fn build_url(path: &str, api_version: &str) -> String {
    format!("{}{}?api-version={}", ARM_BASE, path, api_version)
}

pub(crate) fn subscription_path(subscription_id: &str, suffix: &str) -> String {
    format!("/subscriptions/{}{}", subscription_id, suffix)
}

pub(crate) fn resource_group_path(subscription_id: &str, rg: &str, suffix: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}{}",
        subscription_id, rg, suffix
    )
}

fn api_error(status: StatusCode, body: &str) -> ArmError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error: Some(e) }) => (
            e.code.unwrap_or_else(|| "Unknown".to_string()),
            e.message.unwrap_or_else(|| body.to_string()),
        ),
        _ => ("Unknown".to_string(), body.to_string()),
    };
    ArmError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

impl ArmClient {
    /// Authenticate with service-principal credentials and build a client
    pub async fn new(creds: &Credentials) -> Result<Self> {
        let http = Client::builder().user_agent("vmcapture-cli").build()?;
        let token = acquire_token(&http, creds).await?;

        Ok(Self {
            http,
            credentials: creds.clone(),
            token: Mutex::new(token),
            subscription_id: creds.subscription_id.clone(),
            retry: RetryConfig::exponential(4, 500, 8_000),
        })
    }

    /// Current bearer secret, re-acquired when the cached token is past its
    /// expiry. Long walkthroughs outlive a single AAD token, and the final
    /// cleanup must still be able to authenticate.
    async fn bearer(&self) -> Result<String, ArmError> {
        let mut token = self.token.lock().await;
        if token.is_expired() {
            debug!("bearer token expired, requesting a new one");
            *token = acquire_token(&self.http, &self.credentials).await?;
        }
        Ok(token.secret().to_string())
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub(crate) fn subscription_path(&self, suffix: &str) -> String {
        subscription_path(&self.subscription_id, suffix)
    }

    pub(crate) fn resource_group_path(&self, rg: &str, suffix: &str) -> String {
        resource_group_path(&self.subscription_id, rg, suffix)
    }

    /// GET a resource
    pub(crate) async fn get_json(&self, path: &str, api_version: &str) -> Result<Value> {
        let resp = self
            .execute(Method::GET, build_url(path, api_version), None)
            .await
            .with_context(|| format!("GET {}", path))?;
        Ok(resp.body)
    }

    /// GET a resource that may not exist (404 maps to None)
    pub(crate) async fn get_optional_json(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<Option<Value>> {
        match self
            .execute(Method::GET, build_url(path, api_version), None)
            .await
        {
            Ok(resp) => Ok(Some(resp.body)),
            Err(ArmError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("GET {}", path)),
        }
    }

    /// PUT a resource and wait for the operation to complete
    pub(crate) async fn put_and_wait(
        &self,
        path: &str,
        api_version: &str,
        body: Value,
    ) -> Result<Value> {
        let resp = self
            .execute(Method::PUT, build_url(path, api_version), Some(body))
            .await
            .with_context(|| format!("PUT {}", path))?;
        self.wait_for_completion(resp)
            .await
            .with_context(|| format!("waiting for PUT {}", path))
    }

    /// POST an action and wait for the operation to complete.
    /// Returns the terminal poll body (carries `properties.output` for
    /// operations like capture and runCommand).
    pub(crate) async fn post_and_wait(
        &self,
        path: &str,
        api_version: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let resp = self
            .execute(Method::POST, build_url(path, api_version), body)
            .await
            .with_context(|| format!("POST {}", path))?;
        self.wait_for_completion(resp)
            .await
            .with_context(|| format!("waiting for POST {}", path))
    }

    /// POST an action that completes synchronously (e.g. generalize)
    pub(crate) async fn post_no_content(&self, path: &str, api_version: &str) -> Result<()> {
        self.execute(Method::POST, build_url(path, api_version), None)
            .await
            .with_context(|| format!("POST {}", path))?;
        Ok(())
    }

    /// DELETE a resource and wait for the operation to complete
    pub(crate) async fn delete_and_wait(&self, path: &str, api_version: &str) -> Result<()> {
        let resp = self
            .execute(Method::DELETE, build_url(path, api_version), None)
            .await
            .with_context(|| format!("DELETE {}", path))?;
        self.wait_for_completion(resp)
            .await
            .with_context(|| format!("waiting for DELETE {}", path))?;
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<ArmResponse, ArmError> {
        with_retry(&self.retry, || {
            self.send_once(method.clone(), &url, body.as_ref())
        })
        .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<ArmResponse, ArmError> {
        debug!(%method, url, "arm request");

        let bearer = self.bearer().await?;
        let mut req = self.http.request(method, url).bearer_auth(&bearer);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ArmError::Network(e.to_string()))?;

        let status = resp.status();
        let poll_url = resp
            .headers()
            .get("azure-asyncoperation")
            .or_else(|| resp.headers().get(header::LOCATION))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = resp
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = resp
            .text()
            .await
            .map_err(|e| ArmError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ArmError::Decode(e.to_string()))?
        };

        Ok(ArmResponse {
            status,
            poll_url,
            retry_after,
            body,
        })
    }

    /// Poll an Azure-AsyncOperation/Location URL until the operation reaches
    /// a terminal state. Responses without a poll header completed inline.
    async fn wait_for_completion(&self, initial: ArmResponse) -> Result<Value, ArmError> {
        let Some(url) = initial.poll_url else {
            return Ok(initial.body);
        };
        let mut delay = initial.retry_after.unwrap_or(DEFAULT_POLL_INTERVAL);

        for _ in 0..MAX_POLLS {
            debug!(url = %url, delay_secs = delay.as_secs(), "polling operation");
            tokio::time::sleep(delay).await;

            let resp = self.execute(Method::GET, url.clone(), None).await?;
            delay = resp.retry_after.unwrap_or(DEFAULT_POLL_INTERVAL);

            // Location-style polling signals in-progress with 202
            if resp.status == StatusCode::ACCEPTED {
                continue;
            }

            match operation_state(&resp.body) {
                Some(OperationState::Succeeded) => return Ok(resp.body),
                Some(OperationState::Failed(message)) => {
                    return Err(ArmError::Operation {
                        status: "Failed".to_string(),
                        message,
                    })
                }
                Some(OperationState::InProgress) => continue,
                // Final Location poll returns the resource itself
                None => return Ok(resp.body),
            }
        }

        Err(ArmError::Operation {
            status: "TimedOut".to_string(),
            message: "operation did not reach a terminal state".to_string(),
        })
    }
}

async fn acquire_token(http: &Client, creds: &Credentials) -> Result<AccessToken, ArmError> {
    let url = format!("{}/{}/oauth2/v2.0/token", AAD_BASE, creds.tenant_id);
    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("scope", ARM_SCOPE),
    ];

    let resp = http
        .post(&url)
        .form(&params)
        .send()
        .await
        .map_err(|e| ArmError::Network(format!("requesting AAD token: {}", e)))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ArmError::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(api_error(status, &text));
    }

    let token: TokenResponse = serde_json::from_str(&text)
        .map_err(|e| ArmError::Decode(format!("AAD token response: {}", e)))?;
    Ok(AccessToken::new(token.access_token, token.expires_in))
}
