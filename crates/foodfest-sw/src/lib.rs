//! # FoodFest Service Worker
//!
//! Precaching service worker core for the FoodFest offline shell.
//!
//! ## Features
//!
//! - **Install**: fetch every asset in the manifest and store it in one named bucket
//! - **Activate**: delete buckets left behind by earlier versions
//! - **Fetch**: answer requests cache-first, forwarding misses to the network
//!
//! ## Architecture
//!
//! ```text
//! PrecacheManager
//!     ├── PrecacheConfig (prefix + version + scope + AssetManifest)
//!     ├── WorkerState (Uninstalled → Installing → Installed → Activating → Active)
//!     ├── CacheStorage (caches)
//!     │       └── bucket "<prefix><version>"
//!     │               └── RequestKey → Response
//!     └── Network (HTTP or a local build directory)
//! ```
//!
//! Misses are never written back: the manifest is the only source of cached
//! entries.

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod network;
pub mod request;

pub use cache::{CacheStorage, MemoryCacheStorage};
pub use config::PrecacheConfig;
pub use lifecycle::WorkerState;
pub use manager::{
    compute_keeplist, FetchOutcome, InstallReport, PrecacheEvent, PrecacheManager,
    ResponseSource,
};
pub use manifest::{AssetManifest, FOODFEST_ASSETS};
pub use network::{HttpConfig, HttpNetwork, Network, SiteDirectory};
pub use request::{Request, RequestKey, Response};
