//! Blocking HTTP client with pluggable request authentication.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::credentials::AwsCredentials;
use crate::error::AwsApiError;
use crate::sigv4::Signer;

/// How outgoing requests are authenticated.
#[derive(Clone)]
pub enum Auth {
    /// AWS SigV4 with shared long-lived credentials.
    SigV4 {
        /// Region/service bound signer.
        signer: Signer,
        /// Process-wide credentials.
        credentials: Arc<AwsCredentials>,
    },
    /// HTTP basic auth (e.g. an internal master user).
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// No authentication.
    None,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::SigV4 {
                signer,
                credentials,
            } => f
                .debug_struct("SigV4")
                .field("signer", signer)
                .field("credentials", credentials)
                .finish(),
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Auth::None => f.write_str("None"),
        }
    }
}

/// Thin wrapper that authenticates and sends one request at a time.
#[derive(Clone)]
pub struct SignedClient {
    client: Client,
    auth: Auth,
}

impl SignedClient {
    /// Builds a client with the given per-request timeout.
    pub fn new(auth: Auth, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, auth })
    }

    /// Underlying reqwest client, used to start request builders.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Builds, authenticates and executes `builder`. No retry is attempted.
    pub fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let builder = match &self.auth {
            Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
            _ => builder,
        };
        let mut request = builder.build().context("failed to build request")?;
        if let Auth::SigV4 {
            signer,
            credentials,
        } = &self.auth
        {
            signer.sign(&mut request, credentials, Utc::now())?;
        }
        let url = request.url().clone();
        tracing::debug!(method = %request.method(), %url, "sending request");
        self.client
            .execute(request)
            .with_context(|| format!("request to {url} failed"))
    }
}

/// Returns the response unchanged on 2xx, otherwise an [`AwsApiError`].
pub fn ensure_success(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_type = response
        .headers()
        .get("x-amzn-errortype")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(AwsApiError::from_parts(service, status.as_u16(), error_type.as_deref(), &body).into())
}
