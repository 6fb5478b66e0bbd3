//! Long-lived AWS credentials, built once per process and handed to every signed client.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Static access-key credentials with an optional validity deadline.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    /// Builds a credential set, rejecting empty key material.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let access_key_id = access_key_id.into().trim().to_string();
        let secret_access_key = secret_access_key.into().trim().to_string();
        anyhow::ensure!(!access_key_id.is_empty(), "missing AWS access key id");
        anyhow::ensure!(
            !secret_access_key.is_empty(),
            "missing AWS secret access key"
        );
        let session_token = session_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
            expires_at,
        })
    }

    /// Access key id (safe to log).
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub(crate) fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Session token for temporary credentials.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Deadline after which the credentials must not be used.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credentials are past their deadline at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Fails once the validity lifetime has elapsed.
    pub fn ensure_fresh(&self) -> Result<()> {
        if let Some(deadline) = self.expires_at {
            anyhow::ensure!(
                Utc::now() < deadline,
                "AWS credentials for {} expired at {}",
                self.access_key_id,
                deadline.to_rfc3339()
            );
        }
        Ok(())
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rejects_blank_keys() {
        assert!(AwsCredentials::new(" ", "secret", None, None).is_err());
        assert!(AwsCredentials::new("AKID", "", None, None).is_err());
    }

    #[test]
    fn blank_session_token_is_dropped() {
        let creds = AwsCredentials::new("AKID", "secret", Some("  ".into()), None).unwrap();
        assert_eq!(creds.session_token(), None);
    }

    #[test]
    fn expiry_is_enforced() {
        let past = Utc::now() - Duration::minutes(5);
        let creds = AwsCredentials::new("AKID", "secret", None, Some(past)).unwrap();
        assert!(creds.is_expired_at(Utc::now()));
        assert!(creds.ensure_fresh().is_err());

        let open = AwsCredentials::new("AKID", "secret", None, None).unwrap();
        assert!(!open.is_expired_at(Utc::now()));
        assert!(open.ensure_fresh().is_ok());
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds =
            AwsCredentials::new("AKID", "topsecret", Some("token123".into()), None).unwrap();
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("token123"));
    }
}
