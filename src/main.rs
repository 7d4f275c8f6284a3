//! # Secret Rotation Handler
//!
//! Command-line entry point for the alternating-user rotation handler.
//!
//! ## Usage
//!
//! ```bash
//! # Process one Lambda-shaped rotation event (file or stdin)
//! secret-rotation-handler handle --event event.json
//!
//! # Run a single rotation step directly
//! secret-rotation-handler step --secret-id <ARN> --token <VERSION_ID> --step createSecret
//!
//! # Drive a full rotation (all four steps in order)
//! secret-rotation-handler rotate --secret-id <ARN>
//!
//! # Inspect a secret's versions and stage labels
//! secret-rotation-handler status --secret-id <ARN>
//! ```

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use secret_rotation_handler::request::ParseStepError;
use secret_rotation_handler::{
    AwsSecretsManagerStore, HandlerConfig, PostgresCredentialManager, RdsTopology,
    RotationCoordinator, RotationRequest, RotationStep, SecretStore,
};

/// Secrets Manager rotation handler for RDS PostgreSQL
#[derive(Parser)]
#[command(name = "secret-rotation-handler")]
#[command(
    about = "Secrets Manager rotation handler for RDS PostgreSQL",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), " ", env!("BUILD_DATETIME"), ")"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// AWS region (defaults to the SDK credential chain's region)
    #[arg(short, long, global = true)]
    region: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one rotation event in the Lambda invocation shape
    Handle {
        /// Path to the event JSON file; reads stdin when omitted
        #[arg(long, value_name = "FILE")]
        event: Option<PathBuf>,
    },
    /// Run a single rotation step directly
    Step {
        /// The secret ARN or identifier
        #[arg(long, value_name = "ARN")]
        secret_id: String,

        /// The secret version id this rotation attempt targets
        #[arg(long, value_name = "VERSION_ID")]
        token: String,

        /// One of createSecret, setSecret, testSecret, finishSecret
        #[arg(long, value_parser = parse_step)]
        step: RotationStep,
    },
    /// Drive all four rotation steps in order, like the scheduler would
    Rotate {
        /// The secret ARN or identifier
        #[arg(long, value_name = "ARN")]
        secret_id: String,

        /// Version id for the attempt; a fresh UUID when omitted
        #[arg(long, value_name = "VERSION_ID")]
        token: Option<String>,
    },
    /// Show a secret's versions and their stage labels
    Status {
        /// The secret ARN or identifier
        #[arg(long, value_name = "ARN")]
        secret_id: String,
    },
}

fn parse_step(value: &str) -> Result<RotationStep, ParseStepError> {
    value.parse()
}

fn read_event(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read event from stdin")?;
            Ok(buffer)
        }
    }
}

async fn build_coordinator(region: Option<String>, config: HandlerConfig) -> RotationCoordinator {
    let store = Arc::new(AwsSecretsManagerStore::new(region.clone()).await);
    let topology = Arc::new(RdsTopology::new(region).await);
    RotationCoordinator::new(store, Arc::new(PostgresCredentialManager::new()), config)
        .with_topology(topology)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_rotation_handler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = HandlerConfig::from_env();

    match cli.command {
        Commands::Handle { event } => {
            let raw = read_event(event.as_deref())?;
            let request: RotationRequest =
                serde_json::from_str(&raw).context("event is not a valid rotation request")?;
            info!(step = %request.step, secret = %request.secret_id, "processing rotation event");
            let coordinator = build_coordinator(cli.region, config).await;
            coordinator.execute(&request).await?;
        }
        Commands::Step {
            secret_id,
            token,
            step,
        } => {
            let request = RotationRequest::new(secret_id, token, step);
            let coordinator = build_coordinator(cli.region, config).await;
            coordinator.execute(&request).await?;
        }
        Commands::Rotate { secret_id, token } => {
            let token = token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let coordinator = build_coordinator(cli.region, config).await;
            coordinator.run_rotation(&secret_id, &token).await?;
            println!("✓ Rotation complete: version {token} is now AWSCURRENT");
        }
        Commands::Status { secret_id } => {
            let store = AwsSecretsManagerStore::new(cli.region).await;
            let metadata = store
                .describe_secret(&secret_id)
                .await
                .context("failed to describe secret")?;

            println!("Secret: {secret_id}");
            println!(
                "Rotation enabled: {}",
                metadata
                    .rotation_enabled
                    .map_or("unknown".to_string(), |enabled| enabled.to_string())
            );
            let mut versions: Vec<_> = metadata.versions.iter().collect();
            versions.sort_by_key(|(version_id, _)| (*version_id).clone());
            for (version_id, stages) in versions {
                let mut labels: Vec<&str> = stages.iter().map(String::as_str).collect();
                labels.sort_unstable();
                println!("  {version_id}: {}", labels.join(", "));
            }
        }
    }

    Ok(())
}
