//! One coordinated build evaluation.
//!
//! fingerprint -> stash -> invocation -> engine, exactly once, with the
//! staged secret passed as a sensitive argument and scrubbed from anything
//! the engine hands back.

use std::sync::Arc;

use serde::Serialize;
use stash_state::{Fingerprint, REDACTED};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{BuildConfig, FingerprintComputer, Result, StashError};
use crate::engine::{BuildEngine, BuildInvocation, BuildResult, EngineError};
use crate::redact::Redactor;
use crate::stash::{SecretStash, Transition};

/// Result of [`BuildCoordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub evaluation_id: Uuid,
    pub result: BuildResult,
    pub fingerprint: Fingerprint,
    pub generation: u64,
    pub transition: Transition,
}

/// Composes fingerprinting, secret staging and the build engine for one target.
pub struct BuildCoordinator {
    stash: Arc<SecretStash>,
    engine: Arc<dyn BuildEngine>,
}

impl BuildCoordinator {
    pub fn new(stash: Arc<SecretStash>, engine: Arc<dyn BuildEngine>) -> Self {
        Self { stash, engine }
    }

    pub fn stash(&self) -> &Arc<SecretStash> {
        &self.stash
    }

    pub async fn run(&self, config: &BuildConfig, secret_arg_name: &str) -> Result<BuildOutcome> {
        self.evaluate(config, secret_arg_name, None).await
    }

    /// Like [`run`](Self::run); `cancel` aborts the evaluation while it waits
    /// on the stash or the credential fetch.
    pub async fn run_cancellable(
        &self,
        config: &BuildConfig,
        secret_arg_name: &str,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        self.evaluate(config, secret_arg_name, Some(cancel)).await
    }

    #[instrument(
        skip(self, config, cancel),
        fields(
            target_id = %self.stash.target(),
            engine = self.engine.name(),
            evaluation_id = tracing::field::Empty,
        )
    )]
    async fn evaluate(
        &self,
        config: &BuildConfig,
        secret_arg_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<BuildOutcome> {
        let evaluation_id = Uuid::new_v4();
        tracing::Span::current().record("evaluation_id", tracing::field::display(evaluation_id));

        check_secret_arg(config, secret_arg_name)?;
        let fingerprint = FingerprintComputer::compute(config)?;
        let staged = self.stash.stage(&fingerprint, cancel).await?;

        let invocation = BuildInvocation::from_config(config)
            .with_sensitive_arg(secret_arg_name, staged.secret.clone());
        let redactor = Redactor::new().with_secret(&staged.secret);

        let result = match self.engine.build(&invocation).await {
            Ok(result) => result,
            Err(e) => {
                let source = scrub_engine_error(e, &redactor);
                warn!(error = %source, "build engine failed");
                return Err(StashError::BuildFailed { source });
            }
        };
        let result = enforce_redaction(result, &invocation, &redactor);

        info!(
            fingerprint = %fingerprint.short(),
            generation = staged.generation,
            transition = %staged.transition,
            artifact = %result.artifact_ref,
            "build evaluation complete"
        );

        Ok(BuildOutcome {
            evaluation_id,
            result,
            fingerprint,
            generation: staged.generation,
            transition: staged.transition,
        })
    }
}

fn check_secret_arg(config: &BuildConfig, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StashError::InvalidConfig(
            "secret argument name is empty".to_string(),
        ));
    }
    if config.build_args.contains(name) {
        return Err(StashError::InvalidConfig(format!(
            "secret argument '{}' collides with a public build argument",
            name
        )));
    }
    Ok(())
}

/// Mask sensitive argument names in the echo and scrub literal secrets from
/// every returned string, whatever the engine did.
fn enforce_redaction(
    mut result: BuildResult,
    invocation: &BuildInvocation,
    redactor: &Redactor,
) -> BuildResult {
    let mut scrubbed = 0;
    let mut scrub = |value: &mut String| {
        let r = redactor.redact(value);
        scrubbed += r.redactions_applied;
        *value = r.text;
    };

    if !is_digest_ref(&result.artifact_ref) {
        scrub(&mut result.artifact_ref);
    }
    result.build_args.values_mut().for_each(&mut scrub);
    result.metadata.values_mut().for_each(&mut scrub);

    for (name, value) in &invocation.args {
        if value.is_sensitive() {
            result.build_args.insert(name.clone(), REDACTED.to_string());
        }
    }

    if scrubbed > 0 {
        warn!(redactions = scrubbed, "engine output contained a sensitive value; scrubbed");
    }
    result
}

/// `sha256:<64 hex>` references are content digests and cannot carry a secret.
fn is_digest_ref(artifact_ref: &str) -> bool {
    artifact_ref
        .strip_prefix("sha256:")
        .map(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

fn scrub_engine_error(err: EngineError, redactor: &Redactor) -> EngineError {
    match err {
        EngineError::Failed(msg) => EngineError::Failed(redactor.scrub(&msg)),
        EngineError::Unavailable(msg) => EngineError::Unavailable(redactor.scrub(&msg)),
        timeout @ EngineError::Timeout { .. } => timeout,
    }
}
