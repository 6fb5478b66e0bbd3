//! OpenSearch Service domain provisioning: existence check, one-shot creation and readiness wait.
//!
//! The domain moves from absent to present exactly once; nothing here deletes or
//! reconfigures an existing domain.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AwsApiError;

pub mod client;
pub mod wait;

pub use client::OpenSearchDomainClient;
pub use wait::{cancel_pair, wait_until_ready, CancelHandle, CancelToken, WaitOutcome, WaitPolicy};

/// Engine version requested on creation.
pub const DEFAULT_ENGINE_VERSION: &str = "OpenSearch_2.5";
/// Data node instance type requested on creation.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.small.search";
/// EBS volume size (GiB) requested on creation.
pub const DEFAULT_VOLUME_SIZE_GIB: u32 = 10;

/// Subset of the service's `DomainStatus` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainStatus {
    /// Domain name.
    pub domain_name: String,
    /// Domain ARN.
    #[serde(rename = "ARN", default)]
    pub arn: Option<String>,
    /// Public endpoint; absent while the domain is being created.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// VPC endpoints keyed by kind.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    /// True while a configuration change or creation is in progress.
    #[serde(default)]
    pub processing: bool,
    /// True once the creation request was accepted.
    #[serde(default)]
    pub created: bool,
    /// True while the domain is being deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Engine version string.
    #[serde(default)]
    pub engine_version: Option<String>,
}

impl DomainStatus {
    /// Public endpoint, falling back to the VPC endpoint.
    pub fn reachable_endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .or_else(|| self.endpoints.get("vpc").map(String::as_str))
    }
}

/// Domain management calls the provisioner needs.
pub trait DomainApi: Send + Sync {
    /// Describes `name`; a missing domain is an [`AwsApiError`] with `ResourceNotFoundException`.
    fn describe_domain(&self, name: &str) -> Result<DomainStatus>;

    /// Submits a creation request and returns the initial status.
    fn create_domain(&self, request: &CreateDomainRequest) -> Result<DomainStatus>;
}

fn lookup_domain(api: &dyn DomainApi, name: &str) -> Result<Option<DomainStatus>> {
    match api.describe_domain(name) {
        Ok(status) => Ok(Some(status)),
        Err(err)
            if err
                .downcast_ref::<AwsApiError>()
                .is_some_and(AwsApiError::is_resource_not_found) =>
        {
            Ok(None)
        }
        Err(err) => Err(err.context(format!("failed to describe domain {name}"))),
    }
}

/// Returns `(true, endpoint)` when the domain exists and `(false, None)` when the
/// service reports it missing. Every other failure propagates.
pub fn domain_exists(api: &dyn DomainApi, name: &str) -> Result<(bool, Option<String>)> {
    Ok(match lookup_domain(api, name)? {
        Some(status) => (true, status.reachable_endpoint().map(str::to_string)),
        None => (false, None),
    })
}

/// Inputs for the fixed single-node domain layout.
#[derive(Clone)]
pub struct DomainConfig {
    domain_name: String,
    region: String,
    account_id: String,
    principal_arn: String,
    master_user: String,
    master_password: String,
}

impl DomainConfig {
    /// Validates names and credentials before any remote call.
    pub fn new(
        domain_name: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
        principal_arn: impl Into<String>,
        master_user: impl Into<String>,
        master_password: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            domain_name: domain_name.into().trim().to_string(),
            region: region.into().trim().to_string(),
            account_id: account_id.into().trim().to_string(),
            principal_arn: principal_arn.into().trim().to_string(),
            master_user: master_user.into().trim().to_string(),
            master_password: master_password.into(),
        };
        validate_domain_name(&config.domain_name)?;
        anyhow::ensure!(!config.region.is_empty(), "region is required");
        anyhow::ensure!(
            config.account_id.len() == 12 && config.account_id.chars().all(|c| c.is_ascii_digit()),
            "AWS account id must be 12 digits"
        );
        anyhow::ensure!(
            config.principal_arn.starts_with("arn:"),
            "principal must be an IAM ARN"
        );
        anyhow::ensure!(!config.master_user.is_empty(), "master user name is required");
        anyhow::ensure!(
            config.master_password.chars().count() >= 8,
            "master password must be at least 8 characters"
        );
        Ok(config)
    }

    /// Domain name.
    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Policy granting the configured principal full access to the domain.
    pub fn access_policy(&self) -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "AWS": self.principal_arn },
                "Action": "es:*",
                "Resource": format!(
                    "arn:aws:es:{}:{}:domain/{}/*",
                    self.region, self.account_id, self.domain_name
                ),
            }]
        })
    }

    /// Creation request for this domain.
    pub fn create_request(&self) -> Result<CreateDomainRequest> {
        let access_policies = serde_json::to_string(&self.access_policy())
            .context("failed to encode access policy")?;
        Ok(CreateDomainRequest {
            domain_name: self.domain_name.clone(),
            engine_version: DEFAULT_ENGINE_VERSION.to_string(),
            cluster_config: ClusterConfig {
                instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
                instance_count: 1,
                dedicated_master_enabled: false,
                zone_awareness_enabled: false,
            },
            ebs_options: EbsOptions {
                ebs_enabled: true,
                volume_type: "gp2".to_string(),
                volume_size: DEFAULT_VOLUME_SIZE_GIB,
            },
            access_policies,
            node_to_node_encryption_options: Enabled { enabled: true },
            encryption_at_rest_options: Enabled { enabled: true },
            advanced_security_options: AdvancedSecurityOptions {
                enabled: true,
                internal_user_database_enabled: true,
                master_user_options: MasterUserOptions {
                    master_user_name: self.master_user.clone(),
                    master_user_password: self.master_password.clone(),
                },
            },
            domain_endpoint_options: DomainEndpointOptions {
                enforce_https: true,
            },
        })
    }
}

impl fmt::Debug for DomainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainConfig")
            .field("domain_name", &self.domain_name)
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("principal_arn", &self.principal_arn)
            .field("master_user", &self.master_user)
            .field("master_password", &"<redacted>")
            .finish()
    }
}

fn validate_domain_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    anyhow::ensure!(
        (3..=28).contains(&len),
        "domain name {name:?} must be 3-28 characters"
    );
    anyhow::ensure!(
        name.starts_with(|c: char| c.is_ascii_lowercase()),
        "domain name {name:?} must start with a lowercase letter"
    );
    anyhow::ensure!(
        name.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
        "domain name {name:?} may only contain a-z, 0-9 and -"
    );
    Ok(())
}

/// `CreateDomain` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateDomainRequest {
    /// Domain name.
    pub domain_name: String,
    /// Engine version.
    pub engine_version: String,
    /// Node layout.
    pub cluster_config: ClusterConfig,
    /// Storage.
    #[serde(rename = "EBSOptions")]
    pub ebs_options: EbsOptions,
    /// IAM access policy as a JSON string.
    pub access_policies: String,
    /// Encryption between nodes.
    pub node_to_node_encryption_options: Enabled,
    /// Encryption of stored data.
    pub encryption_at_rest_options: Enabled,
    /// Fine-grained access control.
    pub advanced_security_options: AdvancedSecurityOptions,
    /// Endpoint settings.
    pub domain_endpoint_options: DomainEndpointOptions,
}

/// Cluster node layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterConfig {
    /// Instance type.
    pub instance_type: String,
    /// Data node count.
    pub instance_count: u32,
    /// Dedicated master nodes.
    pub dedicated_master_enabled: bool,
    /// Multi-AZ placement.
    pub zone_awareness_enabled: bool,
}

/// EBS storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EbsOptions {
    /// Attach EBS volumes.
    #[serde(rename = "EBSEnabled")]
    pub ebs_enabled: bool,
    /// Volume type.
    pub volume_type: String,
    /// Size in GiB.
    pub volume_size: u32,
}

/// `{ "Enabled": bool }` option block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Enabled {
    /// Whether the option is on.
    pub enabled: bool,
}

/// Fine-grained access control settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdvancedSecurityOptions {
    /// Enable fine-grained access control.
    pub enabled: bool,
    /// Use the internal user database.
    pub internal_user_database_enabled: bool,
    /// Master credentials.
    pub master_user_options: MasterUserOptions,
}

/// Master user of the internal user database.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MasterUserOptions {
    /// User name.
    pub master_user_name: String,
    /// Password.
    pub master_user_password: String,
}

impl fmt::Debug for MasterUserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterUserOptions")
            .field("master_user_name", &self.master_user_name)
            .field("master_user_password", &"<redacted>")
            .finish()
    }
}

/// Endpoint options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainEndpointOptions {
    /// Reject plain HTTP.
    #[serde(rename = "EnforceHTTPS")]
    pub enforce_https: bool,
}

/// Result of [`provision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The domain was already present and idle.
    AlreadyExists {
        /// Its endpoint.
        endpoint: Option<String>,
    },
    /// The provisioner waited for the domain, creating it first when `created`.
    Waited {
        /// True when this run issued the creation request.
        created: bool,
        /// How the wait ended.
        outcome: WaitOutcome,
    },
}

/// Ensures the configured domain exists, creating it when absent and waiting until ready.
/// A rejected creation request is fatal and nothing is rolled back.
pub fn provision(
    api: &dyn DomainApi,
    config: &DomainConfig,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<ProvisionOutcome> {
    let name = config.domain_name();
    match lookup_domain(api, name)? {
        Some(status) if !status.processing => {
            tracing::info!(domain = name, "domain already exists");
            Ok(ProvisionOutcome::AlreadyExists {
                endpoint: status.reachable_endpoint().map(str::to_string),
            })
        }
        Some(_) => {
            tracing::info!(domain = name, "domain exists but is still processing");
            let outcome = wait_until_ready(api, name, policy, cancel)?;
            Ok(ProvisionOutcome::Waited {
                created: false,
                outcome,
            })
        }
        None => {
            let request = config.create_request()?;
            let status = api
                .create_domain(&request)
                .with_context(|| format!("failed to create domain {name}"))?;
            tracing::info!(domain = name, arn = ?status.arn, "domain creation requested");
            let outcome = wait_until_ready(api, name, policy, cancel)?;
            Ok(ProvisionOutcome::Waited {
                created: true,
                outcome,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Replays a fixed sequence of describe results; the last one repeats.
    pub(crate) struct ScriptedApi {
        describes: Vec<std::result::Result<DomainStatus, AwsApiError>>,
        describe_calls: AtomicUsize,
        create_error: Option<AwsApiError>,
        pub(crate) created: Mutex<Vec<CreateDomainRequest>>,
    }

    pub(crate) fn status(processing: bool, endpoint: Option<&str>) -> DomainStatus {
        DomainStatus {
            domain_name: "demo".into(),
            endpoint: endpoint.map(str::to_string),
            processing,
            created: true,
            ..DomainStatus::default()
        }
    }

    pub(crate) fn not_found() -> AwsApiError {
        AwsApiError::from_parts(
            "es",
            409,
            Some("ResourceNotFoundException"),
            r#"{"message":"Domain not found: demo"}"#,
        )
    }

    impl ScriptedApi {
        pub(crate) fn new(describes: Vec<std::result::Result<DomainStatus, AwsApiError>>) -> Self {
            Self {
                describes,
                describe_calls: AtomicUsize::new(0),
                create_error: None,
                created: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn processing_then_ready(processing: usize, endpoint: &str) -> Self {
            let mut script: Vec<_> = (0..processing).map(|_| Ok(status(true, None))).collect();
            script.push(Ok(status(false, Some(endpoint))));
            Self::new(script)
        }

        pub(crate) fn failing_describe(code: &str, http_status: u16) -> Self {
            Self::new(vec![Err(AwsApiError::from_parts(
                "es",
                http_status,
                Some(code),
                "{}",
            ))])
        }

        pub(crate) fn with_create_error(mut self, err: AwsApiError) -> Self {
            self.create_error = Some(err);
            self
        }

        pub(crate) fn describe_calls(&self) -> usize {
            self.describe_calls.load(Ordering::SeqCst)
        }
    }

    impl DomainApi for ScriptedApi {
        fn describe_domain(&self, _name: &str) -> Result<DomainStatus> {
            let call = self.describe_calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.describes.len().saturating_sub(1));
            match &self.describes[idx] {
                Ok(status) => Ok(status.clone()),
                Err(err) => Err(err.clone().into()),
            }
        }

        fn create_domain(&self, request: &CreateDomainRequest) -> Result<DomainStatus> {
            if let Some(err) = &self.create_error {
                return Err(err.clone().into());
            }
            self.created.lock().unwrap().push(request.clone());
            Ok(status(true, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::{not_found, status, ScriptedApi};
    use super::*;

    fn config() -> DomainConfig {
        DomainConfig::new(
            "demo",
            "us-east-1",
            "123456789012",
            "arn:aws:iam::123456789012:user/rag",
            "admin",
            "Sup3r-secret!",
        )
        .unwrap()
    }

    #[test]
    fn missing_domain_is_absent() {
        let api = ScriptedApi::new(vec![Err(not_found())]);
        assert_eq!(domain_exists(&api, "demo").unwrap(), (false, None));
    }

    #[test]
    fn existing_domain_reports_endpoint() {
        let api = ScriptedApi::new(vec![Ok(status(false, Some("search-demo.es.amazonaws.com")))]);
        assert_eq!(
            domain_exists(&api, "demo").unwrap(),
            (true, Some("search-demo.es.amazonaws.com".to_string()))
        );
    }

    #[test]
    fn other_describe_errors_propagate() {
        let api = ScriptedApi::failing_describe("AccessDeniedException", 403);
        let err = domain_exists(&api, "demo").unwrap_err();
        let api_err = err.downcast_ref::<AwsApiError>().unwrap();
        assert_eq!(api_err.code, "AccessDeniedException");
    }

    #[test]
    fn vpc_endpoint_is_used_when_public_is_missing() {
        let mut status = status(false, None);
        status.endpoints.insert("vpc".into(), "vpc-demo.es.amazonaws.com".into());
        assert_eq!(status.reachable_endpoint(), Some("vpc-demo.es.amazonaws.com"));
    }

    #[test]
    fn parses_service_status_document() {
        let raw = r#"{
            "DomainName": "demo",
            "ARN": "arn:aws:es:us-east-1:123456789012:domain/demo",
            "Created": true,
            "Deleted": false,
            "Processing": false,
            "Endpoint": "search-demo.us-east-1.es.amazonaws.com",
            "EngineVersion": "OpenSearch_2.5",
            "ClusterConfig": {"InstanceType": "t3.small.search"}
        }"#;
        let parsed: DomainStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.engine_version.as_deref(), Some("OpenSearch_2.5"));
        assert!(parsed.created);
        assert!(!parsed.processing);
    }

    #[test]
    fn create_request_matches_fixed_layout() {
        let body = serde_json::to_value(config().create_request().unwrap()).unwrap();
        assert_eq!(body["EngineVersion"], "OpenSearch_2.5");
        assert_eq!(body["ClusterConfig"]["InstanceType"], "t3.small.search");
        assert_eq!(body["ClusterConfig"]["InstanceCount"], 1);
        assert_eq!(body["ClusterConfig"]["DedicatedMasterEnabled"], false);
        assert_eq!(body["ClusterConfig"]["ZoneAwarenessEnabled"], false);
        assert_eq!(body["EBSOptions"]["EBSEnabled"], true);
        assert_eq!(body["EBSOptions"]["VolumeType"], "gp2");
        assert_eq!(body["EBSOptions"]["VolumeSize"], 10);
        assert_eq!(body["NodeToNodeEncryptionOptions"]["Enabled"], true);
        assert_eq!(body["EncryptionAtRestOptions"]["Enabled"], true);
        assert_eq!(body["AdvancedSecurityOptions"]["InternalUserDatabaseEnabled"], true);
        assert_eq!(
            body["AdvancedSecurityOptions"]["MasterUserOptions"]["MasterUserName"],
            "admin"
        );
        assert_eq!(body["DomainEndpointOptions"]["EnforceHTTPS"], true);

        let policy: serde_json::Value =
            serde_json::from_str(body["AccessPolicies"].as_str().unwrap()).unwrap();
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Principal"]["AWS"], "arn:aws:iam::123456789012:user/rag");
        assert_eq!(
            statement["Resource"],
            "arn:aws:es:us-east-1:123456789012:domain/demo/*"
        );
    }

    #[test]
    fn config_rejects_bad_input() {
        let bad_name = DomainConfig::new("Demo", "us-east-1", "123456789012", "arn:x", "a", "password1");
        assert!(bad_name.is_err());
        let bad_account = DomainConfig::new("demo", "us-east-1", "1234", "arn:x", "a", "password1");
        assert!(bad_account.is_err());
        let short_password = DomainConfig::new("demo", "us-east-1", "123456789012", "arn:x", "a", "pw");
        assert!(short_password.is_err());
    }

    #[test]
    fn debug_hides_master_password() {
        let rendered = format!("{:?} {:?}", config(), config().create_request().unwrap());
        assert!(!rendered.contains("Sup3r-secret!"));
    }

    #[test]
    fn existing_idle_domain_is_left_alone() {
        let api = ScriptedApi::new(vec![Ok(status(false, Some("search-demo")))]);
        let outcome = provision(
            &api,
            &config(),
            &WaitPolicy::fixed(Duration::ZERO),
            &CancelToken::never(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            ProvisionOutcome::AlreadyExists {
                endpoint: Some("search-demo".into())
            }
        );
        assert!(api.created.lock().unwrap().is_empty());
    }

    #[test]
    fn absent_domain_is_created_then_polled() {
        let api = ScriptedApi::new(vec![
            Err(not_found()),
            Ok(status(true, None)),
            Ok(status(true, None)),
            Ok(status(false, Some("search-demo"))),
        ]);
        let outcome = provision(
            &api,
            &config(),
            &WaitPolicy::fixed(Duration::ZERO),
            &CancelToken::never(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            ProvisionOutcome::Waited {
                created: true,
                outcome: WaitOutcome::Ready {
                    endpoint: Some("search-demo".into()),
                    attempts: 3,
                },
            }
        );
        assert_eq!(api.describe_calls(), 4);
        assert_eq!(api.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn processing_domain_is_waited_on_without_create() {
        let api = ScriptedApi::new(vec![
            Ok(status(true, None)),
            Ok(status(false, Some("search-demo"))),
        ]);
        let outcome = provision(
            &api,
            &config(),
            &WaitPolicy::fixed(Duration::ZERO),
            &CancelToken::never(),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            ProvisionOutcome::Waited { created: false, outcome: WaitOutcome::Ready { .. } }
        ));
        assert!(api.created.lock().unwrap().is_empty());
    }

    #[test]
    fn rejected_creation_is_fatal() {
        let api = ScriptedApi::new(vec![Err(not_found())]).with_create_error(
            AwsApiError::from_parts("es", 400, Some("ValidationException"), "{}"),
        );
        let err = provision(
            &api,
            &config(),
            &WaitPolicy::fixed(Duration::ZERO),
            &CancelToken::never(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("ValidationException"));
        assert_eq!(api.describe_calls(), 1);
    }
}
