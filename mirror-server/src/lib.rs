//! # Crates Mirror Server
//!
//! A lazy caching mirror for a crates-style registry. Artifacts are served
//! from a local cache and fetched from the origin on first request; a
//! background task keeps the metadata store in step with the upstream index.
//!
//! ## Key Modules
//!
//! - [`coordinator`]: cache-coherent, single-flight fetch path
//! - [`artifact_store`]: atomic on-disk blob storage
//! - [`upstream`]: origin download client and response classification
//! - [`server`]: HTTP routes, startup and graceful shutdown
//! - [`sync`]: periodic index sync task
//! - [`config`]: configuration file and environment defaults
//! - [`error`]: error taxonomy and HTTP error responses

pub mod artifact_store;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod state;
pub mod sync;
pub mod upstream;
pub mod validation;

pub use artifact_store::{ArtifactStore, WriteOutcome};
pub use config::Config;
pub use coordinator::{ArtifactOutcome, FetchCoordinator, FetchError, PrefetchReport};
pub use error::{AppError, AppResult};
pub use server::{create_router, run_server};
pub use state::AppState;
pub use upstream::{Origin, UpstreamClient, UpstreamError};
