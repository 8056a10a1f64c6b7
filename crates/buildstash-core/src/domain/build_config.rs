//! Declarative build configuration and its fingerprint.
//!
//! The JSON shape follows the docker-build image resource:
//!
//! ```json
//! {
//!   "context": { "location": "../" },
//!   "dockerfile": { "location": "../Dockerfile" },
//!   "buildArgs": { "AWS_REGION": "us-east-1" },
//!   "tags": ["app:latest"],
//!   "push": false,
//!   "exports": [{ "cacheonly": {} }]
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stash_state::Fingerprint;

use super::digest;
use super::error::{Result, StashError};

/// Bumped whenever the canonical form changes, so old fingerprints never
/// collide with new ones.
const FINGERPRINT_FORMAT: u32 = 1;

/// Location of a build context or Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub location: String,
}

impl Locator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    fn is_blank(&self) -> bool {
        self.location.trim().is_empty()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Where build output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    /// Populate the build cache only.
    #[serde(rename = "cacheonly")]
    CacheOnly {},
    /// Load into the local docker image store.
    Docker {},
    /// Write the image filesystem to a local directory.
    Local { dest: String },
    /// Write a tarball.
    Tar { dest: String },
    /// Push to a registry under the configured tags.
    Registry {},
}

/// Public build arguments in declaration order.
///
/// Duplicates are kept as declared so that validation can reject them;
/// a plain map would silently keep the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArgs(Vec<(String, String)>);

impl BuildArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names declared more than once, sorted.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut dups = BTreeSet::new();
        for (k, _) in &self.0 {
            if !seen.insert(k.as_str()) {
                dups.insert(k.clone());
            }
        }
        dups.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BuildArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        BuildArgs(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for BuildArgs {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BuildArgs {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ArgsVisitor;

        impl<'de> Visitor<'de> for ArgsVisitor {
            type Value = BuildArgs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of build-argument names to string values")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<BuildArgs, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut args = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    args.push((k, v));
                }
                Ok(BuildArgs(args))
            }
        }

        deserializer.deserialize_map(ArgsVisitor)
    }
}

/// Everything that determines image content, minus the staged secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub context: Locator,
    pub dockerfile: Locator,
    #[serde(default)]
    pub build_args: BuildArgs,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub exports: Vec<ExportTarget>,
    /// Build stage to stop at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

impl BuildConfig {
    pub fn new(context: impl Into<String>, dockerfile: impl Into<String>) -> Self {
        Self {
            context: Locator::new(context),
            dockerfile: Locator::new(dockerfile),
            build_args: BuildArgs::new(),
            tags: Vec::new(),
            push: false,
            exports: Vec::new(),
            target: None,
            platforms: Vec::new(),
        }
    }

    pub fn with_build_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.push(name, value);
        self
    }

    /// Add `name` only if the config does not already declare it.
    pub fn with_default_build_arg(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let name = name.into();
        if !self.build_args.contains(&name) {
            self.build_args.push(name, value);
        }
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_export(mut self, export: ExportTarget) -> Self {
        self.exports.push(export);
        self
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// Load from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reject configs that cannot be fingerprinted meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.context.is_blank() {
            return Err(StashError::InvalidConfig(
                "context locator is empty".to_string(),
            ));
        }
        if self.dockerfile.is_blank() {
            return Err(StashError::InvalidConfig(
                "dockerfile locator is empty".to_string(),
            ));
        }
        if self.build_args.iter().any(|(k, _)| k.trim().is_empty()) {
            return Err(StashError::InvalidConfig(
                "build argument name is empty".to_string(),
            ));
        }
        let dups = self.build_args.duplicate_names();
        if !dups.is_empty() {
            return Err(StashError::InvalidConfig(format!(
                "duplicate build argument(s): {}",
                dups.join(", ")
            )));
        }
        Ok(())
    }

    /// Canonical JSON value hashed into the fingerprint.
    ///
    /// Build args are keyed by name; tags and platforms are sets; exports keep
    /// their declared order.
    fn canonical_value(&self) -> serde_json::Value {
        let args: serde_json::Map<String, serde_json::Value> = self
            .build_args
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        let tags: BTreeSet<&str> = self.tags.iter().map(String::as_str).collect();
        let platforms: BTreeSet<&str> = self.platforms.iter().map(String::as_str).collect();

        serde_json::json!({
            "format": FINGERPRINT_FORMAT,
            "context": self.context.location,
            "dockerfile": self.dockerfile.location,
            "buildArgs": args,
            "tags": tags,
            "push": self.push,
            "exports": self.exports,
            "target": self.target,
            "platforms": platforms,
        })
    }
}

/// Derives the fingerprint of a build's non-secret inputs.
pub struct FingerprintComputer;

impl FingerprintComputer {
    /// Validate `config` and hash its canonical form.
    ///
    /// Equal configs, in any field or key order, always produce equal
    /// fingerprints.
    pub fn compute(config: &BuildConfig) -> Result<Fingerprint> {
        config.validate()?;
        digest::compute_digest(&config.canonical_value())
    }
}
