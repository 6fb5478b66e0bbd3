//! Signed client for the OpenSearch Service configuration API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::utf8_percent_encode;
use serde::Deserialize;
use url::Url;

use super::{CreateDomainRequest, DomainApi, DomainStatus};
use crate::credentials::AwsCredentials;
use crate::http::{ensure_success, Auth, SignedClient};
use crate::sigv4::{Signer, URI_ENCODE_SET};

/// Configuration API version path segment.
pub const CONFIG_API_VERSION: &str = "2021-01-01";

const SERVICE: &str = "es";

/// Blocking `DescribeDomain` / `CreateDomain` client.
#[derive(Clone)]
pub struct OpenSearchDomainClient {
    client: SignedClient,
    endpoint: String,
}

impl OpenSearchDomainClient {
    /// Builds a client for `region`, optionally against a custom endpoint.
    pub fn new(
        credentials: Arc<AwsCredentials>,
        region: &str,
        endpoint: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!region.trim().is_empty(), "missing region");
        let endpoint = endpoint
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://es.{region}.amazonaws.com"));
        let auth = Auth::SigV4 {
            signer: Signer::new(region, SERVICE),
            credentials,
        };
        Ok(Self {
            client: SignedClient::new(auth, timeout)?,
            endpoint,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url> {
        let raw = format!(
            "{}/{CONFIG_API_VERSION}/opensearch/domain{suffix}",
            self.endpoint
        );
        Url::parse(&raw).with_context(|| format!("invalid domain API URL {raw}"))
    }

    /// URL of the describe call for `name`.
    pub fn describe_url(&self, name: &str) -> Result<Url> {
        self.url(&format!("/{}", utf8_percent_encode(name, URI_ENCODE_SET)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainStatusReply {
    domain_status: DomainStatus,
}

impl DomainApi for OpenSearchDomainClient {
    fn describe_domain(&self, name: &str) -> Result<DomainStatus> {
        let url = self.describe_url(name)?;
        let resp = ensure_success(SERVICE, self.client.send(self.client.http().get(url))?)?;
        let reply: DomainStatusReply = resp
            .json()
            .context("failed to parse DescribeDomain response")?;
        Ok(reply.domain_status)
    }

    fn create_domain(&self, request: &CreateDomainRequest) -> Result<DomainStatus> {
        let url = self.url("")?;
        let builder = self.client.http().post(url).json(request);
        let resp = ensure_success(SERVICE, self.client.send(builder)?)?;
        let reply: DomainStatusReply = resp
            .json()
            .context("failed to parse CreateDomain response")?;
        Ok(reply.domain_status)
    }
}
