//! # Filebridge Server Library
//!
//! This crate provides the HTTP service behind Filebridge: one browsable tree
//! joining a user's local storage with a set of machines reached over SFTP.
//!
//! ## Overview
//!
//! - **Path resolution**: request paths map to a realm (local user storage, a
//!   remote host, or a virtual index) plus a validated relative path
//! - **Providers**: local disk and SFTP behind one `FilesystemProvider` trait
//! - **Listings**: filtered directory listings with file/dir/size totals
//! - **Streaming**: whole-file and byte-range responses read in bounded chunks
//! - **Uploads**: multipart uploads with sanitized names and SHA-256 digests
//!
//! ## Architecture
//!
//! ```text
//! request ──▶ PathKey ──▶ Provider (Local | Remote) ──▶ stat
//!                                                      │
//!                          ┌───────────────────────────┴──────────────┐
//!                          ▼                                          ▼
//!                   browser::summarize                  StreamingResponder
//!                   (ListingResponse JSON)              (200 / 206 body stream)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use server::{app, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
//!     axum::serve(listener, app(&config)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Realms, providers, listings, streaming and uploads
//! - [`router`]: HTTP routes and error mapping

pub mod config;
pub mod files;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export files types for convenience
pub use files::{FilesystemProvider, FsError, PathKey, Provider, Realm, StreamingResponder};

// Re-export router types for convenience
pub use router::{router, AppState, RouterError};

/// Build the application router for a configuration.
pub fn app(config: &Config) -> axum::Router {
    router(AppState::from_config(config))
}
