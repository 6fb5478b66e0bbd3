//! AWS Signature Version 4 signing for blocking reqwest requests.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Request;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};
use url::Url;

use crate::credentials::AwsCredentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Everything except RFC 3986 unreserved characters gets percent-encoded.
pub const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Signs requests for one service in one region.
#[derive(Debug, Clone)]
pub struct Signer {
    region: String,
    service: String,
    content_sha256_header: bool,
}

impl Signer {
    /// Builds a signer for `service` (e.g. `es`, `bedrock`) in `region`.
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
            content_sha256_header: false,
        }
    }

    /// Also sends and signs `x-amz-content-sha256`.
    pub fn with_content_sha256(mut self) -> Self {
        self.content_sha256_header = true;
        self
    }

    /// Adds `x-amz-date`, session/payload headers and `Authorization` to `request`.
    pub fn sign(
        &self,
        request: &mut Request,
        credentials: &AwsCredentials,
        now: DateTime<Utc>,
    ) -> Result<()> {
        credentials.ensure_fresh()?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = {
            let payload = request.body().and_then(|body| body.as_bytes()).unwrap_or(&[]);
            hex_sha256(payload)
        };

        let headers = request.headers_mut();
        headers.insert("x-amz-date", HeaderValue::from_str(&amz_date)?);
        if let Some(token) = credentials.session_token() {
            headers.insert(
                "x-amz-security-token",
                HeaderValue::from_str(token).context("invalid AWS session token")?,
            );
        }
        if self.content_sha256_header {
            headers.insert("x-amz-content-sha256", HeaderValue::from_str(&payload_hash)?);
        }

        let mut signed = vec![("host".to_string(), host_header(request.url())?)];
        for (name, value) in request.headers() {
            let name = name.as_str();
            if name == "content-type" || name.starts_with("x-amz-") {
                let value = value
                    .to_str()
                    .with_context(|| format!("header {name} is not visible ASCII"))?;
                signed.push((name.to_string(), value.to_string()));
            }
        }

        let (canonical, signed_headers) = canonical_request(
            request.method().as_str(),
            request.url(),
            &signed,
            &payload_hash,
        );
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let to_sign = string_to_sign(&amz_date, &scope, &canonical);
        let key = signing_key(
            credentials.secret_access_key(),
            &date,
            &self.region,
            &self.service,
        )?;
        let signature = hex(&hmac(&key, to_sign.as_bytes())?);
        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id()
        );
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization).context("invalid authorization header")?,
        );
        Ok(())
    }
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("cannot sign request without host: {url}"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Returns the canonical request plus the `;`-joined signed header list.
pub(crate) fn canonical_request(
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        grouped
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(collapse_spaces(value));
    }
    let mut canonical_headers = String::new();
    for (name, values) in &grouped {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&values.join(","));
        canonical_headers.push('\n');
    }
    let signed_headers = grouped.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical = format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        canonical_uri(url),
        canonical_query(url)
    );
    (canonical, signed_headers)
}

// Outgoing paths are already percent-encoded, so encoding the segments again
// yields the double encoding non-S3 services expect.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let Some(query) = url.query() else {
        return String::new();
    };
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (uri_encode_component(key), uri_encode_component(value))
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode_component(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    utf8_percent_encode(&decoded, URI_ENCODE_SET).to_string()
}

fn collapse_spaces(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    )
}

pub(crate) fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| anyhow!("invalid HMAC key: {err}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Lowercase hex SHA-256 digest.
pub fn hex_sha256(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
