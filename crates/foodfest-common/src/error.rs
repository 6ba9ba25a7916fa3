//! Error types for the offline shell.

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the offline shell.
#[derive(Error, Debug)]
pub enum FoodFestError {
    /// A network fetch failed or returned an unusable response.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Cache storage failed to read or write.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A lifecycle method was called in the wrong worker state.
    #[error("State error: {0}")]
    State(String),

    /// A manifest asset could not be precached; the whole install is void.
    #[error("Install failed on {asset}: {source}")]
    Install {
        asset: String,
        #[source]
        source: Box<FoodFestError>,
    },

    /// A stale bucket could not be deleted during activation.
    #[error("Activation failed deleting {bucket}: {source}")]
    Activation {
        bucket: String,
        #[source]
        source: Box<FoodFestError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FoodFestError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Wrap a failure as an install failure for `asset`.
    pub fn install(asset: impl Into<String>, source: FoodFestError) -> Self {
        Self::Install {
            asset: asset.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a failure as an activation failure for `bucket`.
    pub fn activation(bucket: impl Into<String>, source: FoodFestError) -> Self {
        Self::Activation {
            bucket: bucket.into(),
            source: Box::new(source),
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            FoodFestError::Network { .. } => "network",
            FoodFestError::Cache { .. } => "cache",
            FoodFestError::Config(_) => "config",
            FoodFestError::State(_) => "state",
            FoodFestError::Install { .. } => "install",
            FoodFestError::Activation { .. } => "activation",
            FoodFestError::Io(_) => "io",
            FoodFestError::Url(_) => "url",
            FoodFestError::Json(_) => "json",
        }
    }
}

/// Result type alias for offline shell operations.
pub type Result<T> = std::result::Result<T, FoodFestError>;
