//! Prometheus exporter for Cosmos SDK chains.
//!
//! The exporter resolves the chain's working denomination once at startup,
//! then answers every scrape by querying the node's REST gateway and
//! rendering the results in the Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Chain node    │<────│     Scraper     │<────│   HTTP Server   │
//! │  (REST / LCD)   │     │ (fan-out, fold) │     │   (/metrics/*)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! cosmos-exporter --node http://127.0.0.1:1317 --bech-prefix umee
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod denom;
pub mod http;
pub mod mapping;
pub mod metrics;
pub mod node;
pub mod rest;
pub mod scrape;

pub use config::{ConfigError, ExporterConfig};
pub use denom::{DenomOverrides, DenominationConfig, ResolveError, resolve};
pub use http::{AppState, HttpServer};
pub use node::{NodeClient, NodeError};
pub use rest::RestNodeClient;
pub use scrape::{ScrapeSettings, Scraper, SharedScraper};
