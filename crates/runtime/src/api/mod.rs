//! HTTP API module for the studio runtime
//!
//! The entire module is conditionally compiled based on the `http-api`
//! feature flag.

#[cfg(feature = "http-api")]
pub mod server;

#[cfg(feature = "http-api")]
pub mod routes;

#[cfg(feature = "http-api")]
pub mod middleware;

#[cfg(feature = "http-api")]
pub mod types;

#[cfg(feature = "http-api")]
pub mod traits;

#[cfg(feature = "http-api")]
pub use server::{ApiDoc, HttpApiServer};

#[cfg(feature = "http-api")]
pub use traits::StudioApiProvider;
