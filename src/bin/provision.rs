use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docqa::config::{init_tracing, AwsArgs, LogArgs};
use docqa::provisioner::{
    cancel_pair, domain_exists, provision, CancelHandle, DomainConfig, OpenSearchDomainClient,
    ProvisionOutcome, WaitOutcome, WaitPolicy,
};

#[derive(Parser)]
#[command(
    name = "docqa-provision",
    about = "Create the OpenSearch Service domain if it is missing and wait until it is ready"
)]
struct ProvisionCli {
    /// Domain name
    #[arg(long, env = "OPENSEARCH_DOMAIN")]
    domain: String,

    /// AWS account id that owns the domain
    #[arg(long, env = "AWS_ACCOUNT_ID")]
    account_id: Option<String>,

    /// IAM principal ARN granted access by the domain policy
    #[arg(long, env = "IAM_USER_ARN")]
    principal_arn: Option<String>,

    /// Master user of the internal user database
    #[arg(long, env = "OPENSEARCH_ADMIN_USER")]
    admin_user: Option<String>,

    /// Master user password
    #[arg(long, env = "OPENSEARCH_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Only report whether the domain exists
    #[arg(long, default_value_t = false)]
    check_only: bool,

    /// Seconds before the first re-check
    #[arg(long, env = "DOCQA_POLL_INITIAL_SECS", default_value_t = 30)]
    poll_initial_secs: u64,

    /// Longest single delay between checks, in seconds
    #[arg(long, env = "DOCQA_POLL_MAX_SECS", default_value_t = 120)]
    poll_max_secs: u64,

    /// Delay growth factor
    #[arg(long, env = "DOCQA_POLL_MULTIPLIER", default_value_t = 1.5)]
    poll_multiplier: f64,

    /// Give up after this many seconds (0 waits forever)
    #[arg(long, env = "DOCQA_MAX_WAIT_SECS", default_value_t = 3600)]
    max_wait_secs: u64,

    /// Override the configuration API endpoint
    #[arg(long, env = "DOCQA_DOMAIN_API_ENDPOINT")]
    domain_api_endpoint: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(flatten)]
    aws: AwsArgs,

    #[command(flatten)]
    log: LogArgs,
}

impl ProvisionCli {
    fn wait_policy(&self) -> Result<WaitPolicy> {
        anyhow::ensure!(
            self.poll_multiplier.is_finite() && self.poll_multiplier >= 1.0,
            "--poll-multiplier must be a finite number of at least 1 (got {})",
            self.poll_multiplier
        );
        Ok(WaitPolicy {
            initial_delay: Duration::from_secs(self.poll_initial_secs),
            max_delay: Duration::from_secs(self.poll_max_secs.max(self.poll_initial_secs)),
            multiplier: self.poll_multiplier,
            max_elapsed: (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs)),
        })
    }

    fn domain_config(&self) -> Result<DomainConfig> {
        DomainConfig::new(
            self.domain.clone(),
            self.aws.region.clone(),
            self.account_id.clone().context("AWS_ACCOUNT_ID is required")?,
            self.principal_arn.clone().context("IAM_USER_ARN is required")?,
            self.admin_user.clone().context("OPENSEARCH_ADMIN_USER is required")?,
            self.admin_password
                .clone()
                .context("OPENSEARCH_ADMIN_PASSWORD is required")?,
        )
    }
}

fn main() -> Result<ExitCode> {
    let cli = ProvisionCli::parse();
    init_tracing(&cli.log);

    let credentials = cli.aws.credentials()?;
    let client = OpenSearchDomainClient::new(
        credentials,
        &cli.aws.region,
        cli.domain_api_endpoint.as_deref(),
        Duration::from_secs(cli.timeout_secs),
    )?;

    if cli.check_only {
        let (exists, endpoint) = domain_exists(&client, &cli.domain)?;
        match (exists, endpoint) {
            (true, Some(endpoint)) => println!("domain {} exists at {endpoint}", cli.domain),
            (true, None) => println!("domain {} exists but has no endpoint yet", cli.domain),
            (false, _) => println!("domain {} does not exist", cli.domain),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli.domain_config()?;
    let policy = cli.wait_policy()?;
    let (handle, token) = cancel_pair();
    watch_ctrl_c(handle);

    let outcome = provision(&client, &config, &policy, &token)?;
    Ok(report(&cli.domain, outcome))
}

fn report(domain: &str, outcome: ProvisionOutcome) -> ExitCode {
    let (created, outcome) = match outcome {
        ProvisionOutcome::AlreadyExists { endpoint } => {
            println!(
                "domain {domain} already exists; endpoint: {}",
                endpoint.as_deref().unwrap_or("(none)")
            );
            return ExitCode::SUCCESS;
        }
        ProvisionOutcome::Waited { created, outcome } => (created, outcome),
    };
    let verb = if created { "created" } else { "finished processing" };
    match outcome {
        WaitOutcome::Ready { endpoint, attempts } => {
            println!(
                "domain {domain} {verb} after {attempts} checks; endpoint: {}",
                endpoint.as_deref().unwrap_or("(none)")
            );
            ExitCode::SUCCESS
        }
        WaitOutcome::TimedOut { attempts, elapsed } => {
            println!(
                "domain {domain} still processing after {attempts} checks ({}s); giving up",
                elapsed.as_secs()
            );
            ExitCode::from(2)
        }
        WaitOutcome::Cancelled { attempts } => {
            println!("wait for domain {domain} cancelled after {attempts} checks");
            ExitCode::from(130)
        }
    }
}

fn watch_ctrl_c(handle: CancelHandle) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(error = %err, "ctrl+c handling unavailable");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            tracing::info!("received ctrl+c; cancelling wait");
            handle.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(extra: &[&str]) -> ProvisionCli {
        let mut args = vec!["docqa-provision", "--domain", "docqa-demo"];
        args.extend_from_slice(extra);
        ProvisionCli::try_parse_from(args).unwrap()
    }

    #[test]
    fn rejects_non_finite_multiplier() {
        for raw in ["inf", "1e309", "NaN", "0.5"] {
            let err = cli(&["--poll-multiplier", raw]).wait_policy().unwrap_err();
            assert!(err.to_string().contains("--poll-multiplier"), "{raw}: {err}");
        }
    }

    #[test]
    fn builds_policy_from_flags() {
        let policy = cli(&[
            "--poll-initial-secs",
            "10",
            "--poll-max-secs",
            "5",
            "--poll-multiplier",
            "2",
            "--max-wait-secs",
            "0",
        ])
        .wait_policy()
        .unwrap();
        assert_eq!(policy.initial_delay, Duration::from_secs(10));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_elapsed, None);
    }
}
