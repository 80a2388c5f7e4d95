//! API constants
//!
//! Every upload route is versioned under [`API_PREFIX`]. Bump [`API_VERSION`]
//! together with the path literals in the handler `#[utoipa::path]`
//! annotations.

/// API base path prefix (version-independent)
pub const API_BASE: &str = "/api";

pub const API_VERSION: &str = "v0";

/// Versioned prefix for all upload routes
pub const API_PREFIX: &str = "/api/v0";

/// Where the OpenAPI document is served
pub const OPENAPI_PATH: &str = "/api/openapi.json";
