//! Provisioning Backend Integration
//!
//! Typed access to the VPN provisioning backend through a common trait.
//!
//! # Layers
//!
//! - [`ApiGateway`]: raw JSON-over-HTTP calls with failure classification
//! - [`VpnBackend`]: typed operations used by the conductor
//! - [`HttpVpnBackend`]: the production implementation of the trait
//!
//! # Usage
//!
//! ```ignore
//! use hopevpn_conductor::backend::{HttpVpnBackend, VpnBackend};
//!
//! let backend = HttpVpnBackend::with_base_url("http://localhost:3000");
//! let providers = backend.providers().await?;
//! ```

mod gateway;
mod http;
mod models;
mod traits;

pub use gateway::{
    extract_error_message, ApiGateway, ApiRequest, CallClass, GatewayError, GatewayTimeouts,
    MAX_REASON_CHARS,
};
pub use http::HttpVpnBackend;
pub use models::{
    AggregateStats, HealthReport, Provider, ProviderRef, Selection, Server, SignupResponse,
    UserLookup, UserRecord, VpnVerification, SERVER_ID_PREFIX_LEN,
};
pub use traits::VpnBackend;
