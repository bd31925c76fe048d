//! HTTP client for the SDK build service.
//!
//! [`HttpBuildApi`] implements [`sdkci_core::BuildApi`] over the service's
//! REST endpoints, authenticated with a bearer token from [`ApiConfig`].

pub mod client;
pub mod config;

pub use client::HttpBuildApi;
pub use config::{ApiConfig, DEFAULT_BASE_URL};
