//! The fixed list of assets that must be available offline.

use std::collections::HashSet;

use foodfest_common::{FoodFestError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Assets produced by the FoodFest build.
///
/// Paths stay relative so the site works when hosted under a sub-path
/// such as `user.github.io/foodfest/`.
pub const FOODFEST_ASSETS: &[&str] = &[
    "./index.html",
    "./events.html",
    "./tickets.html",
    "./schedule.html",
    "./assets/css/style.css",
    "./assets/css/bootstrap.css",
    "./assets/css/tickets.css",
    "./dist/app.bundle.js",
    "./dist/events.bundle.js",
    "./dist/tickets.bundle.js",
    "./dist/schedule.bundle.js",
];

/// Ordered, validated list of relative asset paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AssetManifest {
    paths: Vec<String>,
}

impl AssetManifest {
    /// Build a manifest, rejecting absolute, empty and duplicate paths.
    pub fn new<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();

        let mut seen = HashSet::with_capacity(paths.len());
        for path in &paths {
            validate_path(path)?;
            if !seen.insert(path.as_str()) {
                return Err(FoodFestError::config(format!(
                    "manifest lists '{path}' more than once"
                )));
            }
        }

        Ok(Self { paths })
    }

    /// The FoodFest manifest.
    pub fn foodfest() -> Self {
        Self {
            paths: FOODFEST_ASSETS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Resolve every path against `scope`, keeping manifest order.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<(String, Url)>> {
        self.paths
            .iter()
            .map(|path| Ok((path.clone(), scope.join(path)?)))
            .collect()
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::foodfest()
    }
}

impl TryFrom<Vec<String>> for AssetManifest {
    type Error = FoodFestError;

    fn try_from(paths: Vec<String>) -> Result<Self> {
        Self::new(paths)
    }
}

impl From<AssetManifest> for Vec<String> {
    fn from(manifest: AssetManifest) -> Self {
        manifest.paths
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(FoodFestError::config("manifest contains an empty path"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(FoodFestError::config(format!(
            "manifest path '{path}' is absolute; use './{}'",
            path.trim_start_matches(['/', '\\'])
        )));
    }
    // Anything that parses on its own carries a scheme.
    if Url::parse(path).is_ok() {
        return Err(FoodFestError::config(format!(
            "manifest path '{path}' is a full URL, expected a relative path"
        )));
    }
    Ok(())
}
