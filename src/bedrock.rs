//! Signed access to the Bedrock runtime `InvokeModel` API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::utf8_percent_encode;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::credentials::AwsCredentials;
use crate::http::{ensure_success, Auth, SignedClient};
use crate::sigv4::{Signer, URI_ENCODE_SET};

/// Blocking Bedrock runtime client shared by the embedding and chat models.
#[derive(Clone)]
pub struct BedrockRuntime {
    client: SignedClient,
    endpoint: String,
}

impl BedrockRuntime {
    /// Builds a runtime client for `region`, optionally against a custom endpoint.
    pub fn new(
        credentials: Arc<AwsCredentials>,
        region: &str,
        endpoint: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!region.trim().is_empty(), "missing Bedrock region");
        let endpoint = endpoint
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://bedrock-runtime.{region}.amazonaws.com"));
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "Bedrock endpoint must be an http(s) URL"
        );
        let auth = Auth::SigV4 {
            signer: Signer::new(region, "bedrock"),
            credentials,
        };
        Ok(Self {
            client: SignedClient::new(auth, timeout)?,
            endpoint,
        })
    }

    /// `InvokeModel` URL for `model`; the id is escaped so `:` versions survive signing.
    pub fn invoke_url(&self, model: &str) -> Result<Url> {
        let raw = format!(
            "{}/model/{}/invoke",
            self.endpoint,
            utf8_percent_encode(model, URI_ENCODE_SET)
        );
        Url::parse(&raw).with_context(|| format!("invalid Bedrock invoke URL {raw}"))
    }

    /// Sends `body` to `model` and decodes the JSON reply.
    pub fn invoke<B, R>(&self, model: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.invoke_url(model)?;
        let builder = self
            .client
            .http()
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body);
        let resp = ensure_success("bedrock", self.client.send(builder)?)?;
        resp.json()
            .with_context(|| format!("failed to parse Bedrock response from {model}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> BedrockRuntime {
        let creds = Arc::new(AwsCredentials::new("AKID", "secret", None, None).unwrap());
        BedrockRuntime::new(creds, "us-east-1", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn invoke_url_escapes_model_versions() {
        let url = runtime()
            .invoke_url("anthropic.claude-3-haiku-20240307-v1:0")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-haiku-20240307-v1%3A0/invoke"
        );
    }

    #[test]
    fn custom_endpoint_is_used() {
        let creds = Arc::new(AwsCredentials::new("AKID", "secret", None, None).unwrap());
        let rt = BedrockRuntime::new(
            creds,
            "eu-west-1",
            Some("http://127.0.0.1:4566/"),
            Duration::from_secs(5),
        )
        .unwrap();
        let url = rt.invoke_url("amazon.titan-embed-text-v1").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:4566/model/amazon.titan-embed-text-v1/invoke"
        );
    }
}
