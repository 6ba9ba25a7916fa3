//! Precache configuration.

use std::path::Path;

use foodfest_common::{FoodFestError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::AssetManifest;

pub const DEFAULT_APP_PREFIX: &str = "FoodFest-";
pub const DEFAULT_VERSION: &str = "version_01";
pub const DEFAULT_SCOPE: &str = "http://localhost:8080/";

/// Immutable settings handed to the manager at construction.
///
/// Bumping `version` is the only way to invalidate previously cached assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Prefix shared by every bucket this application owns.
    pub app_prefix: String,

    /// Version tag appended to the prefix.
    pub version: String,

    /// Base URL the worker controls; manifest paths resolve against it.
    pub scope: Url,

    /// Assets to precache.
    pub manifest: AssetManifest,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            app_prefix: DEFAULT_APP_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            scope: Url::parse(DEFAULT_SCOPE).expect("default scope is a valid URL"),
            manifest: AssetManifest::foodfest(),
        }
    }
}

impl PrecacheConfig {
    /// Create a validated configuration.
    pub fn new(
        app_prefix: impl Into<String>,
        version: impl Into<String>,
        scope: Url,
        manifest: AssetManifest,
    ) -> Result<Self> {
        let config = Self {
            app_prefix: app_prefix.into(),
            version: version.into(),
            scope,
            manifest,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FoodFestError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Name of the bucket owned by this version.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.app_prefix, self.version)
    }

    /// Check invariants the manager relies on.
    pub fn validate(&self) -> Result<()> {
        if self.app_prefix.is_empty() {
            return Err(FoodFestError::config("app_prefix must not be empty"));
        }
        if self.version.is_empty() {
            return Err(FoodFestError::config("version must not be empty"));
        }
        if self.scope.cannot_be_a_base() {
            return Err(FoodFestError::config(format!(
                "scope '{}' cannot resolve relative paths",
                self.scope
            )));
        }
        if !self.scope.path().ends_with('/') {
            return Err(FoodFestError::config(format!(
                "scope '{}' must end with '/'",
                self.scope
            )));
        }
        Ok(())
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_manifest(mut self, manifest: AssetManifest) -> Self {
        self.manifest = manifest;
        self
    }
}
