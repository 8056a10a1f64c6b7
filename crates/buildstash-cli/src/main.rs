//! buildstash - change-triggered secret staging for container builds
//!
//! ## Commands
//!
//! - `fingerprint`: Print the fingerprint of a build config
//! - `run`: Stage the credential for a target and run one dry-run build
//! - `status`: Show what is staged for a target (never the secret)
//! - `forget`: Drop the staged credential so the next run fetches a new one

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};

use buildstash_core::{
    BuildConfig, BuildCoordinator, CredentialProvider, DryRunEngine, FetchPolicy,
    FingerprintComputer, FsStashStore, MintingProvider, SecretStash, StashStore, StaticProvider,
    TargetId, Transition, REDACTED,
};

#[derive(Parser)]
#[command(name = "buildstash")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stage short-lived build credentials, refreshed only when the build changes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Process configuration, resolved from flags and the environment.
#[derive(Args, Debug, Clone)]
struct Settings {
    /// Credential handed out when no token service is wired (minted per fetch if unset)
    #[arg(long, env = "CODEARTIFACT_AUTH_TOKEN", hide_env_values = true, global = true)]
    auth_token: Option<String>,

    /// CodeArtifact domain passed to the build
    #[arg(long, env = "AWS_CODEARTIFACT_DOMAIN", default_value = "elisabethtest", global = true)]
    domain: String,

    /// AWS account id passed to the build
    #[arg(long, env = "AWS_ACCOUNT_ID", default_value = "1234567890", global = true)]
    account_id: String,

    /// AWS region passed to the build
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    region: String,

    /// Directory holding staged credentials
    #[arg(long, env = "BUILDSTASH_STATE_DIR", default_value = ".buildstash", global = true)]
    state_dir: PathBuf,

    /// Credential fetch timeout in milliseconds
    #[arg(long, env = "BUILDSTASH_FETCH_TIMEOUT_MS", default_value_t = 30_000, global = true)]
    fetch_timeout_ms: u64,
}

impl Settings {
    fn provider(&self) -> Arc<dyn CredentialProvider> {
        match self.auth_token.as_deref() {
            Some(token) if !token.is_empty() => Arc::new(StaticProvider::new(token)),
            _ => Arc::new(MintingProvider::default()),
        }
    }

    fn policy(&self) -> FetchPolicy {
        FetchPolicy::with_timeout_ms(self.fetch_timeout_ms)
    }

    fn store(&self) -> Result<Arc<FsStashStore>> {
        let store = FsStashStore::new(&self.state_dir).with_context(|| {
            format!("Failed to open state directory {}", self.state_dir.display())
        })?;
        Ok(Arc::new(store))
    }

    /// Add the account identifiers as build args unless the config sets them.
    fn apply_defaults(&self, config: BuildConfig) -> BuildConfig {
        config
            .with_default_build_arg("AWS_CODEARTIFACT_DOMAIN", &self.domain)
            .with_default_build_arg("AWS_ACCOUNT_ID", &self.account_id)
            .with_default_build_arg("AWS_REGION", &self.region)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint of a build config
    Fingerprint {
        /// Path to the build config (JSON)
        config: PathBuf,
    },

    /// Stage the credential for a target and run one build
    Run {
        /// Path to the build config (JSON)
        config: PathBuf,

        /// Build target owning the staged credential
        #[arg(short, long, default_value = "app-image")]
        target: String,

        /// Build argument that receives the credential
        #[arg(long, default_value = "CODEARTIFACT_TOKEN")]
        secret_arg: String,

        /// Extra build argument (KEY=VALUE), may be repeated
        #[arg(long = "build-arg", value_parser = parse_build_arg)]
        build_args: Vec<(String, String)>,
    },

    /// Show the staged fingerprint and generation for a target
    Status {
        /// Build target (all targets if omitted)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Drop the staged credential for a target
    Forget {
        /// Build target
        #[arg(short, long, default_value = "app-image")]
        target: String,
    },
}

/// Summary printed by `run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    evaluation_id: String,
    target: String,
    artifact_ref: String,
    fingerprint: String,
    generation: u64,
    transition: Transition,
    secrets_used: SecretsUsed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretsUsed {
    token_preview: String,
    domain: String,
    account_id: String,
    region: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildstash_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Fingerprint { config } => cmd_fingerprint(&cli.settings, &config),
        Commands::Run {
            config,
            target,
            secret_arg,
            build_args,
        } => cmd_run(&cli.settings, &config, &target, &secret_arg, build_args).await,
        Commands::Status { target } => cmd_status(&cli.settings, target.as_deref()).await,
        Commands::Forget { target } => cmd_forget(&cli.settings, &target).await,
    }
}

fn parse_build_arg(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn parse_target(name: &str) -> Result<TargetId> {
    TargetId::new(name).with_context(|| format!("Invalid target name '{}'", name))
}

/// Load a build config and merge settings-derived and command-line args.
fn load_config(
    settings: &Settings,
    path: &Path,
    extra_args: Vec<(String, String)>,
) -> Result<BuildConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build config {}", path.display()))?;
    let mut config = BuildConfig::from_json(&raw)
        .with_context(|| format!("Failed to parse build config {}", path.display()))?;
    for (k, v) in extra_args {
        if config.build_args.contains(&k) {
            bail!("Build argument '{}' is already set in {}", k, path.display());
        }
        config = config.with_build_arg(k, v);
    }
    Ok(settings.apply_defaults(config))
}

/// Print the fingerprint of a build config
fn cmd_fingerprint(settings: &Settings, path: &Path) -> Result<()> {
    let config = load_config(settings, path, Vec::new())?;
    let fingerprint = FingerprintComputer::compute(&config)?;
    println!("{}", fingerprint);
    Ok(())
}

async fn run_once(
    settings: &Settings,
    path: &Path,
    target: &str,
    secret_arg: &str,
    extra_args: Vec<(String, String)>,
) -> Result<RunSummary> {
    let target = parse_target(target)?;
    let config = load_config(settings, path, extra_args)?;

    let stash = SecretStash::new(target.clone(), settings.provider(), settings.store()?)
        .with_policy(settings.policy());
    let coordinator = BuildCoordinator::new(Arc::new(stash), Arc::new(DryRunEngine::new()));

    let outcome = coordinator
        .run(&config, secret_arg)
        .await
        .with_context(|| format!("Build evaluation for target '{}' failed", target))?;
    debug!(stats = ?coordinator.stash().stats(), "stash statistics");

    let token_preview = outcome
        .result
        .build_args
        .get(secret_arg)
        .cloned()
        .unwrap_or_else(|| REDACTED.to_string());

    // Report what the build saw: explicit args win over settings.
    let used = |name: &str, fallback: &str| {
        config.build_args.get(name).unwrap_or(fallback).to_string()
    };

    Ok(RunSummary {
        evaluation_id: outcome.evaluation_id.to_string(),
        target: target.to_string(),
        artifact_ref: outcome.result.artifact_ref,
        fingerprint: outcome.fingerprint.to_string(),
        generation: outcome.generation,
        transition: outcome.transition,
        secrets_used: SecretsUsed {
            token_preview,
            domain: used("AWS_CODEARTIFACT_DOMAIN", &settings.domain),
            account_id: used("AWS_ACCOUNT_ID", &settings.account_id),
            region: used("AWS_REGION", &settings.region),
        },
    })
}

/// Stage the credential and run one build
async fn cmd_run(
    settings: &Settings,
    path: &Path,
    target: &str,
    secret_arg: &str,
    extra_args: Vec<(String, String)>,
) -> Result<()> {
    let summary = run_once(settings, path, target, secret_arg, extra_args).await?;
    info!(
        target_id = %summary.target,
        transition = %summary.transition,
        generation = summary.generation,
        "run complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Show staged fingerprints
async fn cmd_status(settings: &Settings, target: Option<&str>) -> Result<()> {
    let store = settings.store()?;
    let targets = match target {
        Some(name) => vec![parse_target(name)?],
        None => store.targets().await?,
    };

    if targets.is_empty() {
        println!("No staged credentials in {}", settings.state_dir.display());
        return Ok(());
    }

    for target in targets {
        let stash = SecretStash::new(target.clone(), settings.provider(), store.clone());
        match stash.snapshot().await? {
            Some(snap) => println!(
                "{}  fingerprint {}  generation {}  staged {}",
                snap.target,
                snap.fingerprint.short(),
                snap.generation,
                snap.staged_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("{}  (nothing staged)", target),
        }
    }

    Ok(())
}

/// Drop the staged credential
async fn cmd_forget(settings: &Settings, target: &str) -> Result<()> {
    let target = parse_target(target)?;
    let stash = SecretStash::new(target.clone(), settings.provider(), settings.store()?);
    stash
        .forget()
        .await
        .with_context(|| format!("Failed to forget staged credential for '{}'", target))?;

    println!("Forgot staged credential for '{}'", target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "context": { "location": "../" },
        "dockerfile": { "location": "../Dockerfile" },
        "tags": ["docker-build-secret-repro:fixed", "docker-build-secret-repro:working"],
        "push": false,
        "exports": [{ "cacheonly": {} }]
    }"#;

    fn settings(state_dir: &Path, token: Option<&str>) -> Settings {
        Settings {
            auth_token: token.map(str::to_string),
            domain: "elisabethtest".to_string(),
            account_id: "1234567890".to_string(),
            region: "us-east-1".to_string(),
            state_dir: state_dir.to_path_buf(),
            fetch_timeout_ms: 1_000,
        }
    }

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("image.json");
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_arg() {
        assert_eq!(
            parse_build_arg("FEATURE=on").unwrap(),
            ("FEATURE".to_string(), "on".to_string())
        );
        assert_eq!(
            parse_build_arg("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_build_arg("missing-separator").is_err());
        assert!(parse_build_arg("=value").is_err());
    }

    #[test]
    fn test_settings_fill_missing_args_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let config = load_config(
            &settings(dir.path(), None),
            &path,
            vec![("AWS_REGION".to_string(), "eu-west-1".to_string())],
        )
        .unwrap();

        assert_eq!(config.build_args.get("AWS_REGION"), Some("eu-west-1"));
        assert_eq!(config.build_args.get("AWS_ACCOUNT_ID"), Some("1234567890"));
        assert_eq!(
            config.build_args.get("AWS_CODEARTIFACT_DOMAIN"),
            Some("elisabethtest")
        );
    }

    #[tokio::test]
    async fn test_run_summary_reports_build_arg_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let summary = run_once(
            &settings(&dir.path().join("state"), None),
            &path,
            "app-image",
            "CODEARTIFACT_TOKEN",
            vec![("AWS_REGION".to_string(), "eu-west-1".to_string())],
        )
        .await
        .unwrap();

        assert_eq!(summary.secrets_used.region, "eu-west-1");
        assert_eq!(summary.secrets_used.account_id, "1234567890");
        assert_eq!(summary.secrets_used.domain, "elisabethtest");
    }

    #[tokio::test]
    async fn test_run_twice_reuses_then_extra_arg_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let state = dir.path().join("state");

        let first = run_once(&settings(&state, None), &path, "app-image", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap();
        assert_eq!(first.transition, Transition::Created);
        assert_eq!(first.secrets_used.token_preview, REDACTED);

        let second = run_once(&settings(&state, None), &path, "app-image", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap();
        assert_eq!(second.transition, Transition::Reused);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.artifact_ref, first.artifact_ref);

        let third = run_once(
            &settings(&state, None),
            &path,
            "app-image",
            "CODEARTIFACT_TOKEN",
            vec![("ADDME".to_string(), "1".to_string())],
        )
        .await
        .unwrap();
        assert_eq!(third.transition, Transition::Replaced);
        assert_eq!(third.generation, 1);
    }

    #[tokio::test]
    async fn test_run_output_never_contains_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let s = settings(&dir.path().join("state"), Some("tok-cli-secret"));

        let summary = run_once(&s, &path, "app-image", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("tok-cli-secret"));
    }

    #[tokio::test]
    async fn test_forget_then_run_creates_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let s = settings(&dir.path().join("state"), Some("tok-1"));

        run_once(&s, &path, "app-image", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap();
        cmd_forget(&s, "app-image").await.unwrap();
        let again = run_once(&s, &path, "app-image", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap();

        assert_eq!(again.transition, Transition::Created);
        assert_eq!(again.generation, 0);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let s = settings(&dir.path().join("state"), None);

        let err = run_once(&s, &path, "../escape", "CODEARTIFACT_TOKEN", vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid target"));
    }
}
